mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{MockEngine, MockLoader, MockMonitor};
use nimbus::interp::{Interpreter, RunContext, RunInfo};
use nimbus::program::{
    BinOp, ConfigVariable, Expression, LocalVariable, ModelType, Node, OutputVariable, Program,
    ProgramSettings, ResourceNode,
};
use nimbus::rpc::{Engine, Monitor, SchemaLoader};
use nimbus::value::PropertyValue;

struct Fixture {
    monitor: Arc<MockMonitor>,
    engine: Arc<MockEngine>,
    loader: Arc<MockLoader>,
    interpreter: Interpreter,
}

fn fixture(program: Program, config: Vec<(&str, &str)>, secrets: Vec<&str>) -> Fixture {
    let monitor = MockMonitor::new();
    let engine = MockEngine::new();
    let loader = MockLoader::new();
    loader.add_package(serde_json::json!({
        "name": "aws",
        "resources": {
            "aws:s3:Bucket": { "outputs": ["arn", "endpoint"] },
            "aws:rds:Instance": {}
        }
    }));

    let run_info = RunInfo {
        project: "proj".to_string(),
        stack: "dev".to_string(),
        organization: "acme".to_string(),
        config: config
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        config_secrets: secrets.into_iter().map(str::to_string).collect(),
        parallel: 8,
        ..Default::default()
    };

    let interpreter = Interpreter::with_clients(
        run_info,
        program,
        monitor.clone() as Arc<dyn Monitor>,
        engine.clone() as Arc<dyn Engine>,
        loader.clone() as Arc<dyn SchemaLoader>,
        RunContext::new(),
    );
    Fixture {
        monitor,
        engine,
        loader,
        interpreter,
    }
}

fn config(name: &str, model_type: ModelType) -> Node {
    Node::Config(ConfigVariable {
        name: name.to_string(),
        logical_name: None,
        model_type,
        default: None,
        nullable: false,
        depends_on: vec![],
        range: None,
    })
}

fn resource(name: &str, token: &str, inputs: Vec<(&str, Expression)>, deps: &[&str]) -> Node {
    Node::Resource(ResourceNode {
        name: name.to_string(),
        logical_name: None,
        token: token.to_string(),
        inputs: inputs
            .into_iter()
            .map(|(k, e)| (k.to_string(), e))
            .collect(),
        options: None,
        package: None,
        depends_on: deps.iter().map(|s| s.to_string()).collect(),
    })
}

fn output(name: &str, value: Expression, deps: &[&str]) -> Node {
    Node::Output(OutputVariable {
        name: name.to_string(),
        value,
        depends_on: deps.iter().map(|s| s.to_string()).collect(),
    })
}

fn var(name: &str) -> Expression {
    Expression::Variable(name.to_string())
}

fn attr(object: Expression, name: &str) -> Expression {
    Expression::GetAttr {
        object: Box::new(object),
        name: name.to_string(),
    }
}

fn stack_outputs(monitor: &MockMonitor) -> std::collections::BTreeMap<String, PropertyValue> {
    let outputs = monitor.outputs.lock().unwrap();
    assert_eq!(outputs.len(), 1, "expected exactly one output registration");
    outputs[0].1.clone()
}

// ─── Scenario: config + locals ──────────────────────────────────────────────

#[tokio::test]
async fn config_local_and_output_flow_end_to_end() {
    let program = Program {
        nodes: vec![
            config("k", ModelType::Int),
            Node::Local(LocalVariable {
                name: "doubled".to_string(),
                value: Expression::BinaryOp {
                    op: BinOp::Mul,
                    left: Box::new(var("k")),
                    right: Box::new(Expression::Literal(nimbus::value::Value::number(2.0))),
                },
                depends_on: vec!["k".to_string()],
            }),
            output("out", var("doubled"), &["doubled"]),
        ],
    };
    let fx = fixture(program, vec![("proj:k", "7")], vec![]);
    fx.interpreter.run().await.unwrap();

    let outputs = stack_outputs(&fx.monitor);
    assert_eq!(outputs["out"], PropertyValue::Number(14.0));
    assert!(fx
        .monitor
        .shutdown_signalled
        .load(std::sync::atomic::Ordering::SeqCst));
}

// ─── Root stack ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn root_stack_registers_first_and_parents_resources() {
    let program = Program {
        nodes: vec![resource("bucket", "aws:s3:Bucket", vec![], &[])],
    };
    let fx = fixture(program, vec![], vec![]);
    fx.interpreter.run().await.unwrap();

    let order = fx.monitor.registration_order();
    assert_eq!(order, vec!["proj-dev", "bucket"]);

    let stack = fx.monitor.request_for("proj-dev").unwrap();
    assert_eq!(stack.type_token, "pulumi:pulumi:Stack");
    assert!(!stack.custom);

    let bucket = fx.monitor.request_for("bucket").unwrap();
    let stack_urn = MockMonitor::urn_for("pulumi:pulumi:Stack", "proj-dev");
    assert_eq!(bucket.parent, stack_urn);
    assert!(bucket.custom);

    // Outputs are registered against the stack URN
    assert_eq!(fx.monitor.outputs.lock().unwrap()[0].0, stack_urn);
}

// ─── Scenario: secret propagation ───────────────────────────────────────────

#[tokio::test]
async fn secret_config_stays_secret_through_resources_and_outputs() {
    let program = Program {
        nodes: vec![
            config("pw", ModelType::String),
            resource(
                "db",
                "aws:rds:Instance",
                vec![("password", var("pw"))],
                &["pw"],
            ),
            output("exposed", var("pw"), &["pw"]),
        ],
    };
    let fx = fixture(program, vec![("proj:pw", "hunter2")], vec!["proj:pw"]);
    fx.interpreter.run().await.unwrap();

    let db = fx.monitor.request_for("db").unwrap();
    assert_eq!(
        db.object["password"],
        PropertyValue::Secret(Box::new(PropertyValue::String("hunter2".into())))
    );

    let outputs = stack_outputs(&fx.monitor);
    assert!(matches!(outputs["exposed"], PropertyValue::Secret(_)));
}

// ─── Scenario: dependency lifting ───────────────────────────────────────────

#[tokio::test]
async fn resource_references_lift_dependencies_onto_the_request() {
    let program = Program {
        nodes: vec![
            resource("a", "aws:s3:Bucket", vec![], &[]),
            resource(
                "b",
                "aws:s3:Bucket",
                vec![("x", attr(var("a"), "id"))],
                &["a"],
            ),
        ],
    };
    let fx = fixture(program, vec![], vec![]);
    fx.interpreter.run().await.unwrap();

    // b is registered strictly after a's success response
    let order = fx.monitor.registration_order();
    assert_eq!(order, vec!["proj-dev", "a", "b"]);

    let urn_a = MockMonitor::urn_for("aws:s3:Bucket", "a");
    let b = fx.monitor.request_for("b").unwrap();
    assert_eq!(b.property_dependencies["x"], vec![urn_a.clone()]);
    assert!(b.dependencies.contains(&urn_a));
    // The object field itself is marshalled without output wrappers
    assert_eq!(b.object["x"], PropertyValue::String("a-id".into()));
}

// ─── Invariant: bound resources carry their URN ─────────────────────────────

#[tokio::test]
async fn outputs_referencing_resources_carry_lineage() {
    let program = Program {
        nodes: vec![
            resource("site", "aws:s3:Bucket", vec![], &[]),
            output("ref", attr(var("site"), "id"), &["site"]),
        ],
    };
    let fx = fixture(program, vec![], vec![]);
    fx.interpreter.run().await.unwrap();

    let urn = MockMonitor::urn_for("aws:s3:Bucket", "site");
    match &stack_outputs(&fx.monitor)["ref"] {
        PropertyValue::Output(out) => {
            assert!(out.known);
            assert_eq!(out.dependencies, vec![urn]);
            assert_eq!(out.element, PropertyValue::String("site-id".into()));
        }
        other => panic!("expected output wrapper, got {:?}", other),
    }
}

// ─── Invariant: schema-declared outputs are always present ──────────────────

#[tokio::test]
async fn missing_schema_outputs_surface_as_computed() {
    let program = Program {
        nodes: vec![
            resource("site", "aws:s3:Bucket", vec![], &[]),
            // `endpoint` is schema-declared but the monitor never returns it
            output("ep", attr(var("site"), "endpoint"), &["site"]),
        ],
    };
    let fx = fixture(program, vec![], vec![]);
    fx.interpreter.run().await.unwrap();

    let urn = MockMonitor::urn_for("aws:s3:Bucket", "site");
    match &stack_outputs(&fx.monitor)["ep"] {
        PropertyValue::Output(out) => {
            assert!(!out.known);
            assert_eq!(out.dependencies, vec![urn]);
        }
        other => panic!("expected unknown output, got {:?}", other),
    }
}

// ─── Synthetic keys ─────────────────────────────────────────────────────────

#[tokio::test]
async fn bound_resources_expose_synthetic_keys() {
    let program = Program {
        nodes: vec![
            resource("site", "aws:s3:Bucket", vec![], &[]),
            output("type", attr(var("site"), "__type"), &["site"]),
            output("name", attr(var("site"), "__name"), &["site"]),
            output("urn", attr(var("site"), "urn"), &["site"]),
        ],
    };
    let fx = fixture(program, vec![], vec![]);
    fx.interpreter.run().await.unwrap();

    let outputs = stack_outputs(&fx.monitor);
    let unwrap_output = |value: &PropertyValue| -> PropertyValue {
        match value {
            PropertyValue::Output(out) => out.element.clone(),
            other => other.clone(),
        }
    };
    assert_eq!(
        unwrap_output(&outputs["type"]),
        PropertyValue::String("aws:s3:Bucket".into())
    );
    assert_eq!(
        unwrap_output(&outputs["name"]),
        PropertyValue::String("site".into())
    );
    assert_eq!(
        unwrap_output(&outputs["urn"]),
        PropertyValue::String(MockMonitor::urn_for("aws:s3:Bucket", "site"))
    );
}

// ─── Required version ───────────────────────────────────────────────────────

#[tokio::test]
async fn required_version_is_checked_against_the_engine() {
    let program = Program {
        nodes: vec![Node::Settings(ProgramSettings {
            required_version: Some(Expression::Literal(nimbus::value::Value::string(
                ">=3.100.0",
            ))),
        })],
    };
    let fx = fixture(program, vec![], vec![]);
    fx.interpreter.run().await.unwrap();
    assert_eq!(
        *fx.engine.required.lock().unwrap(),
        vec![">=3.100.0".to_string()]
    );
}

#[tokio::test]
async fn engine_rejection_is_the_runs_error() {
    let program = Program {
        nodes: vec![Node::Settings(ProgramSettings {
            required_version: Some(Expression::Literal(nimbus::value::Value::string(
                ">=99.0.0",
            ))),
        })],
    };
    let fx = fixture(program, vec![], vec![]);
    *fx.engine.reject_with.lock().unwrap() =
        Some("engine is at 3.100.0, program requires >=99.0.0".to_string());
    let error = fx.interpreter.run().await.unwrap_err();
    assert!(error.to_string().contains("3.100.0"));
    // Nothing was registered
    assert!(fx.monitor.requests.lock().unwrap().is_empty());
}

// ─── Config errors abort before any registration ────────────────────────────

#[tokio::test]
async fn config_errors_abort_the_run_before_registration() {
    let program = Program {
        nodes: vec![
            config("a", ModelType::Int),
            config("b", ModelType::Int),
            resource("site", "aws:s3:Bucket", vec![], &[]),
        ],
    };
    let fx = fixture(
        program,
        vec![("proj:a", "not-a-number"), ("proj:b", "also-not")],
        vec![],
    );
    let error = fx.interpreter.run().await.unwrap_err();
    assert!(error.to_string().contains("integer"));
    assert!(fx.monitor.requests.lock().unwrap().is_empty());
}

// ─── Failures stop dependents ───────────────────────────────────────────────

#[tokio::test]
async fn evaluation_failures_stop_dependent_registrations() {
    let program = Program {
        nodes: vec![
            Node::Local(LocalVariable {
                name: "broken".to_string(),
                value: var("does_not_exist"),
                depends_on: vec![],
            }),
            resource(
                "site",
                "aws:s3:Bucket",
                vec![("x", var("broken"))],
                &["broken"],
            ),
        ],
    };
    let fx = fixture(program, vec![], vec![]);
    let error = fx.interpreter.run().await.unwrap_err();
    assert!(error.to_string().contains("does_not_exist"));
    // Only the root stack was registered
    assert_eq!(fx.monitor.registration_order(), vec!["proj-dev"]);
}

// ─── Unknown packages fall back to custom resources ─────────────────────────

#[tokio::test]
async fn resources_without_schema_default_to_custom() {
    let program = Program {
        nodes: vec![resource("thing", "unknownpkg:index:Thing", vec![], &[])],
    };
    let fx = fixture(program, vec![], vec![]);
    fx.interpreter.run().await.unwrap();
    let request = fx.monitor.request_for("thing").unwrap();
    assert!(request.custom);
}

// ─── Token canonicalization ─────────────────────────────────────────────────

#[tokio::test]
async fn empty_token_modules_canonicalize_to_index() {
    let program = Program {
        nodes: vec![resource("thing", "aws::Bucket", vec![], &[])],
    };
    let fx = fixture(program, vec![], vec![]);
    fx.interpreter.run().await.unwrap();
    let request = fx.monitor.request_for("thing").unwrap();
    assert_eq!(request.type_token, "aws:index:Bucket");
}

// ─── Parallel siblings both register ────────────────────────────────────────

#[tokio::test]
async fn sibling_resources_all_register() {
    let program = Program {
        nodes: vec![
            resource("a", "aws:s3:Bucket", vec![], &[]),
            resource("b", "aws:s3:Bucket", vec![], &[]),
            resource("c", "aws:s3:Bucket", vec![], &[]),
        ],
    };
    let fx = fixture(program, vec![], vec![]);
    fx.interpreter.run().await.unwrap();
    let mut order = fx.monitor.registration_order();
    order.sort();
    assert_eq!(order, vec!["a", "b", "c", "proj-dev"]);
}

// ─── Loader is consulted through the shared cache seam ──────────────────────

#[tokio::test]
async fn loader_schema_drives_component_detection() {
    let loader = MockLoader::new();
    loader.add_package(serde_json::json!({
        "name": "awsx",
        "resources": {
            "awsx:ecs:Service": { "isComponent": true }
        }
    }));
    let monitor = MockMonitor::new();
    let engine = MockEngine::new();
    let program = Program {
        nodes: vec![resource("svc", "awsx:ecs:Service", vec![], &[])],
    };
    let interpreter = Interpreter::with_clients(
        RunInfo {
            project: "proj".to_string(),
            stack: "dev".to_string(),
            parallel: 2,
            ..Default::default()
        },
        program,
        monitor.clone() as Arc<dyn Monitor>,
        engine as Arc<dyn Engine>,
        loader as Arc<dyn SchemaLoader>,
        RunContext::new(),
    );
    interpreter.run().await.unwrap();
    let request = monitor.request_for("svc").unwrap();
    assert!(!request.custom);
}

// ─── Output wrapper shape sanity ────────────────────────────────────────────

#[tokio::test]
async fn secret_resource_reference_nests_wrappers_in_order() {
    let program = Program {
        nodes: vec![
            resource("site", "aws:s3:Bucket", vec![], &[]),
            output(
                "sealed",
                Expression::Call {
                    name: "secret".to_string(),
                    args: vec![attr(var("site"), "id")],
                },
                &["site"],
            ),
        ],
    };
    let fx = fixture(program, vec![], vec![]);
    fx.interpreter.run().await.unwrap();

    match &stack_outputs(&fx.monitor)["sealed"] {
        PropertyValue::Secret(inner) => match inner.as_ref() {
            PropertyValue::Output(out) if out.known => {}
            other => panic!("expected output inside secret, got {:?}", other),
        },
        other => panic!("expected secret wrapper, got {:?}", other),
    }
}
