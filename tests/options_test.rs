use std::collections::BTreeMap;

use nimbus::eval::{Builtins, Evaluator};
use nimbus::interp::options::translate;
use nimbus::interp::RunInfo;
use nimbus::program::{Expression, ResourceOptions};
use nimbus::rpc::{Alias, UNKNOWN_ID};
use nimbus::value::{Mark, PropertyValue, Value};

fn evaluator() -> Evaluator {
    Evaluator::new(Builtins::new(RunInfo::default()))
}

fn lit(value: Value) -> Option<Expression> {
    Some(Expression::Literal(value))
}

fn object(entries: Vec<(&str, Value)>) -> Value {
    Value::object(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn resource(urn: &str) -> Value {
    object(vec![("urn", Value::string(urn))])
}

#[tokio::test]
async fn absent_options_translate_to_defaults() {
    let translated = translate(None, &evaluator()).await.unwrap();
    assert!(translated.parent.is_none());
    assert!(translated.provider.is_empty());
    assert!(translated.protect.is_none());
    assert!(translated.delete_before_replace.is_none());
}

#[tokio::test]
async fn string_lists_skip_null_and_unknown_elements() {
    let options = ResourceOptions {
        ignore_changes: lit(Value::list(vec![
            Value::string("tags"),
            Value::null(),
            Value::unknown(),
            Value::string("arn"),
        ])),
        ..Default::default()
    };
    let translated = translate(Some(&options), &evaluator()).await.unwrap();
    assert_eq!(translated.ignore_changes, vec!["tags", "arn"]);
}

#[tokio::test]
async fn string_lists_reject_non_string_elements() {
    let options = ResourceOptions {
        additional_secret_outputs: lit(Value::list(vec![Value::number(3.0)])),
        ..Default::default()
    };
    let error = translate(Some(&options), &evaluator()).await.unwrap_err();
    assert!(error.to_string().contains("additionalSecretOutputs"));
}

#[tokio::test]
async fn null_options_are_skipped_entirely() {
    let options = ResourceOptions {
        protect: lit(Value::null()),
        import_id: lit(Value::unknown()),
        ..Default::default()
    };
    let translated = translate(Some(&options), &evaluator()).await.unwrap();
    assert!(translated.protect.is_none());
    assert!(translated.import_id.is_empty());
}

#[tokio::test]
async fn tri_state_booleans_record_presence() {
    let options = ResourceOptions {
        protect: lit(Value::bool(true)),
        retain_on_delete: lit(Value::bool(false)),
        delete_before_replace: lit(Value::bool(false)),
        ..Default::default()
    };
    let translated = translate(Some(&options), &evaluator()).await.unwrap();
    assert_eq!(translated.protect, Some(true));
    assert_eq!(translated.retain_on_delete, Some(false));
    // A provided false is distinct from absent
    assert_eq!(translated.delete_before_replace, Some(false));
}

#[tokio::test]
async fn non_boolean_protect_fails() {
    let options = ResourceOptions {
        protect: lit(Value::string("yes")),
        ..Default::default()
    };
    assert!(translate(Some(&options), &evaluator()).await.is_err());
}

#[tokio::test]
async fn depends_on_collects_resource_urns() {
    let options = ResourceOptions {
        depends_on: lit(Value::list(vec![resource("urn:a"), resource("urn:b")])),
        ..Default::default()
    };
    let translated = translate(Some(&options), &evaluator()).await.unwrap();
    assert_eq!(translated.depends_on, vec!["urn:a", "urn:b"]);
}

#[tokio::test]
async fn provider_forms_urn_and_id() {
    let options = ResourceOptions {
        provider: lit(object(vec![
            ("urn", Value::string("urn:…:p")),
            ("id", Value::string("abc")),
        ])),
        ..Default::default()
    };
    let translated = translate(Some(&options), &evaluator()).await.unwrap();
    assert_eq!(translated.provider, "urn:…:p::abc");
}

#[tokio::test]
async fn computed_provider_id_uses_the_sentinel() {
    let options = ResourceOptions {
        provider: lit(object(vec![
            ("urn", Value::string("urn:…:p")),
            ("id", Value::unknown()),
        ])),
        ..Default::default()
    };
    let translated = translate(Some(&options), &evaluator()).await.unwrap();
    assert_eq!(translated.provider, format!("urn:…:p::{}", UNKNOWN_ID));
}

#[tokio::test]
async fn providers_accepts_a_map() {
    let options = ResourceOptions {
        providers: lit(object(vec![(
            "aws",
            object(vec![
                ("urn", Value::string("urn:p")),
                ("id", Value::string("1")),
            ]),
        )])),
        ..Default::default()
    };
    let translated = translate(Some(&options), &evaluator()).await.unwrap();
    assert_eq!(translated.providers["aws"], "urn:p::1");
}

#[tokio::test]
async fn providers_accepts_an_array_deriving_names_from_urn_types() {
    let provider = object(vec![
        (
            "urn",
            Value::string("urn:pulumi:dev::proj::pulumi:providers:aws::default"),
        ),
        ("id", Value::string("7")),
    ]);
    let options = ResourceOptions {
        providers: lit(Value::list(vec![provider])),
        ..Default::default()
    };
    let translated = translate(Some(&options), &evaluator()).await.unwrap();
    assert_eq!(
        translated.providers["aws"],
        "urn:pulumi:dev::proj::pulumi:providers:aws::default::7"
    );
}

#[tokio::test]
async fn aliases_accept_urn_strings_and_specs() {
    let options = ResourceOptions {
        aliases: lit(Value::tuple(vec![
            Value::string("urn:old"),
            object(vec![
                ("name", Value::string("legacy")),
                ("type", Value::string("aws:s3:Bucket")),
                ("parent", resource("urn:parent")),
            ]),
        ])),
        ..Default::default()
    };
    let translated = translate(Some(&options), &evaluator()).await.unwrap();
    assert_eq!(translated.aliases.len(), 2);
    assert_eq!(translated.aliases[0], Alias::Urn("urn:old".to_string()));
    assert_eq!(
        translated.aliases[1],
        Alias::Spec {
            name: Some("legacy".to_string()),
            resource_type: Some("aws:s3:Bucket".to_string()),
            parent_urn: Some("urn:parent".to_string()),
            no_parent: false,
        }
    );
}

#[tokio::test]
async fn alias_no_parent_excludes_parent() {
    let options = ResourceOptions {
        aliases: lit(Value::list(vec![object(vec![
            ("noParent", Value::bool(true)),
            ("parent", resource("urn:parent")),
        ])])),
        ..Default::default()
    };
    let error = translate(Some(&options), &evaluator()).await.unwrap_err();
    assert!(error.to_string().contains("mutually exclusive"));
}

#[tokio::test]
async fn replacement_trigger_is_marshalled_verbatim() {
    let options = ResourceOptions {
        replacement_trigger: lit(
            Value::string("tick").with_mark(Mark::Dependency("urn:src".into())),
        ),
        ..Default::default()
    };
    let translated = translate(Some(&options), &evaluator()).await.unwrap();
    match translated.replacement_trigger.unwrap() {
        PropertyValue::Output(output) => {
            assert_eq!(output.dependencies, vec!["urn:src".to_string()]);
        }
        other => panic!("expected output-wrapped trigger, got {:?}", other),
    }
}

#[tokio::test]
async fn parent_and_deleted_with_extract_urns() {
    let options = ResourceOptions {
        parent: lit(resource("urn:parent")),
        deleted_with: lit(resource("urn:owner")),
        replace_with: lit(Value::list(vec![resource("urn:r1")])),
        ..Default::default()
    };
    let translated = translate(Some(&options), &evaluator()).await.unwrap();
    assert_eq!(translated.parent.as_deref(), Some("urn:parent"));
    assert_eq!(translated.deleted_with, "urn:owner");
    assert_eq!(translated.replace_with, vec!["urn:r1"]);
}

#[tokio::test]
async fn version_and_download_url_are_strings() {
    let options = ResourceOptions {
        version: lit(Value::string("6.0.2")),
        plugin_download_url: lit(Value::string("https://plugins.example.com")),
        ..Default::default()
    };
    let translated = translate(Some(&options), &evaluator()).await.unwrap();
    assert_eq!(translated.version, "6.0.2");
    assert_eq!(translated.plugin_download_url, "https://plugins.example.com");
}

#[tokio::test]
async fn option_expressions_can_reference_bindings() {
    let evaluator = evaluator();
    evaluator
        .define("db", resource("urn:db"))
        .await
        .unwrap();
    let options = ResourceOptions {
        depends_on: Some(Expression::List(vec![Expression::Variable(
            "db".to_string(),
        )])),
        ..Default::default()
    };
    let translated = translate(Some(&options), &evaluator).await.unwrap();
    assert_eq!(translated.depends_on, vec!["urn:db"]);
}
