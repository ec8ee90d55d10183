use serde::{Deserialize, Serialize};

use crate::value::Value;

// ─── Program ────────────────────────────────────────────────────────────────

/// A parsed program: an immutable sequence of nodes. Parsing the source
/// language happens upstream; the driver hands the interpreter this form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub nodes: Vec<Node>,
}

impl Program {
    /// The settings node's required-version expression, if any.
    pub fn required_version(&self) -> Option<&Expression> {
        self.nodes.iter().find_map(|node| match node {
            Node::Settings(settings) => settings.required_version.as_ref(),
            _ => None,
        })
    }
}

/// A single program node. Config and settings nodes are no-ops during the
/// graph walk; they are handled before it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Config(ConfigVariable),
    Local(LocalVariable),
    Resource(ResourceNode),
    Output(OutputVariable),
    Settings(ProgramSettings),
}

impl Node {
    /// The binding name other nodes use to refer to this one.
    pub fn name(&self) -> &str {
        match self {
            Node::Config(c) => &c.name,
            Node::Local(l) => &l.name,
            Node::Resource(r) => &r.name,
            Node::Output(o) => &o.name,
            Node::Settings(_) => "",
        }
    }

    /// Declared dependencies, seeding the execution DAG.
    pub fn depends_on(&self) -> &[String] {
        match self {
            Node::Config(c) => &c.depends_on,
            Node::Local(l) => &l.depends_on,
            Node::Resource(r) => &r.depends_on,
            Node::Output(o) => &o.depends_on,
            Node::Settings(_) => &[],
        }
    }
}

/// A config variable declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigVariable {
    pub name: String,
    /// The key used in the config map; defaults to `name`.
    #[serde(default)]
    pub logical_name: Option<String>,
    pub model_type: ModelType,
    #[serde(default)]
    pub default: Option<Expression>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub range: Option<SourceRange>,
}

impl ConfigVariable {
    pub fn logical_name(&self) -> &str {
        self.logical_name.as_deref().unwrap_or(&self.name)
    }
}

/// A local variable definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalVariable {
    pub name: String,
    pub value: Expression,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceNode {
    pub name: String,
    /// The name sent to the monitor; defaults to `name`.
    #[serde(default)]
    pub logical_name: Option<String>,
    /// Three-segment `package:module:type` token. An empty module segment
    /// is canonicalized to `index`.
    pub token: String,
    pub inputs: Vec<(String, Expression)>,
    #[serde(default)]
    pub options: Option<ResourceOptions>,
    /// Package descriptor for the schema loader; derived from the token's
    /// package segment when absent.
    #[serde(default)]
    pub package: Option<PackageRef>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ResourceNode {
    pub fn logical_name(&self) -> &str {
        self.logical_name.as_deref().unwrap_or(&self.name)
    }
}

/// An output variable: a named value registered against the root stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputVariable {
    pub name: String,
    pub value: Expression,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Program-level settings. Only the engine-version requirement lives here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramSettings {
    #[serde(default)]
    pub required_version: Option<Expression>,
}

/// Resource options as written in the program: unevaluated expressions,
/// each translated independently onto registration-request fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceOptions {
    pub additional_secret_outputs: Option<Expression>,
    pub aliases: Option<Expression>,
    pub delete_before_replace: Option<Expression>,
    pub deleted_with: Option<Expression>,
    pub depends_on: Option<Expression>,
    pub hide_diffs: Option<Expression>,
    pub ignore_changes: Option<Expression>,
    pub import_id: Option<Expression>,
    pub parent: Option<Expression>,
    pub plugin_download_url: Option<Expression>,
    pub protect: Option<Expression>,
    pub provider: Option<Expression>,
    pub providers: Option<Expression>,
    pub replace_on_changes: Option<Expression>,
    pub replace_with: Option<Expression>,
    pub replacement_trigger: Option<Expression>,
    pub retain_on_delete: Option<Expression>,
    pub version: Option<Expression>,
}

/// Package descriptor handed to the schema loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

// ─── Model Types ────────────────────────────────────────────────────────────

/// The declared model type of a config variable, driving the type-directed
/// decoding of raw config strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelType {
    String,
    Bool,
    Int,
    Number,
    List(Box<ModelType>),
    Map(Box<ModelType>),
    Object(Vec<(String, ModelType)>),
    Tuple(Vec<ModelType>),
    Union(Vec<ModelType>),
    Dynamic,
}

// ─── Expressions ────────────────────────────────────────────────────────────

/// A typed expression over the evaluation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expression {
    /// A literal value.
    Literal(Value),

    /// A reference to a bound variable.
    Variable(String),

    /// Attribute access: expr.name.
    GetAttr {
        object: Box<Expression>,
        name: String,
    },

    /// Index access: expr[key].
    Index {
        collection: Box<Expression>,
        key: Box<Expression>,
    },

    /// List constructor.
    List(Vec<Expression>),

    /// Object constructor.
    Object(Vec<(String, Expression)>),

    /// String template with interpolations.
    Template(Vec<TemplatePart>),

    /// A call into the built-in function library.
    Call { name: String, args: Vec<Expression> },

    /// Ternary: condition ? true_val : false_val.
    Conditional {
        condition: Box<Expression>,
        true_val: Box<Expression>,
        false_val: Box<Expression>,
    },

    /// Binary operation: a + b, a == b, a && b, etc.
    BinaryOp {
        op: BinOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },

    /// Unary operation: !a, -a.
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expression>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TemplatePart {
    Literal(String),
    Interpolation(Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

// ─── Source Location ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRange {
    pub file: String,
    pub line: usize,
    pub column: usize,
}
