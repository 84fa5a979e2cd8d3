mod common;

use common::{Script, ScriptedDriver};
use sqlconduit::{
    BoundParameter, ConduitError, ExecutionLayer, Parameters, Result, Statement, Value,
};
use std::cell::Cell;

fn scripted_layer(script: Script) -> (ExecutionLayer<ScriptedDriver>, common::Probe) {
    let (driver, probe) = ScriptedDriver::new(script);
    (ExecutionLayer::new(driver, "scripted"), probe)
}

fn numbered_rows(n: i64) -> Script {
    Script {
        columns: vec!["n".to_string()],
        rows: (1..=n).map(|i| vec![Value::Integer(i)]).collect(),
        ..Script::default()
    }
}

#[test]
fn test_odd_parameter_list_fails_before_backend() {
    let (_layer, probe) = scripted_layer(Script::default());

    let err = Parameters::from_flat(vec!["@x".into(), 5.into(), "@y".into()]).unwrap_err();
    assert!(matches!(err, ConduitError::ParameterCount { count: 3 }));

    let err = Parameters::from_json(&serde_json::json!(["@x", 5, "@y"])).unwrap_err();
    assert!(matches!(err, ConduitError::ParameterCount { count: 3 }));

    assert_eq!(probe.opened(), 0);
    assert!(probe.commands().is_empty());
}

#[test]
fn test_parameters_bound_in_input_order() {
    let (layer, probe) = scripted_layer(Script {
        affected: 1,
        ..Script::default()
    });

    let statement = Statement::new("UPDATE T SET a=@a, b=@b WHERE c=@c")
        .bind("@c", 3)
        .bind("@a", "x")
        .bind("@b", 2.5);
    layer.update(&statement).unwrap();

    let commands = probe.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].sql(), "UPDATE T SET a=@a, b=@b WHERE c=@c");
    let names: Vec<&str> = commands[0]
        .parameters()
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(names, vec!["@c", "@a", "@b"]);
}

#[test]
fn test_empty_string_binds_like_null() {
    let (layer, probe) = scripted_layer(Script::default());

    layer
        .update(&Statement::new("UPDATE T SET a=@a").bind("@a", ""))
        .unwrap();
    layer
        .update(&Statement::new("UPDATE T SET a=@a").bind("@a", Value::Null))
        .unwrap();
    layer
        .update(&Statement::new("UPDATE T SET a=@a").bind("@a", None::<String>))
        .unwrap();

    let commands = probe.commands();
    let bound: Vec<&BoundParameter> = commands.iter().map(|c| &c.parameters()[0]).collect();
    assert_eq!(bound[0], bound[1]);
    assert_eq!(bound[1], bound[2]);
    assert_eq!(bound[0].value, Value::Null);
}

#[test]
fn test_non_empty_values_bound_unchanged() {
    let (layer, probe) = scripted_layer(Script::default());

    layer
        .update(
            &Statement::new("UPDATE T SET a=@a, b=@b, c=@c")
                .bind("@a", " ")
                .bind("@b", 0)
                .bind("@c", false),
        )
        .unwrap();

    let values: Vec<Value> = probe.commands()[0]
        .parameters()
        .iter()
        .map(|p| p.value.clone())
        .collect();
    assert_eq!(
        values,
        vec![
            Value::Text(" ".to_string()),
            Value::Integer(0),
            Value::Boolean(false)
        ]
    );
}

#[test]
fn test_read_yields_each_row_once_in_order() {
    let (layer, probe) = scripted_layer(numbered_rows(5));

    let data = layer
        .read(&Statement::new("SELECT n"), |row| {
            Ok(row.try_get::<i64>(0)? * 10)
        })
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap();

    assert_eq!(data, vec![10, 20, 30, 40, 50]);
    // One fetch per row plus the one that reports exhaustion
    assert_eq!(probe.fetches(), 6);
    assert_eq!(probe.live(), 0);
}

#[test]
fn test_read_is_pull_based() {
    let (layer, probe) = scripted_layer(numbered_rows(100));
    let projected = Cell::new(0);

    let rows = layer
        .read(&Statement::new("SELECT n"), |row| {
            projected.set(projected.get() + 1);
            row.try_get::<i64>(0)
        })
        .unwrap();
    assert_eq!(probe.fetches(), 0);
    assert_eq!(projected.get(), 0);

    let first_three: Vec<i64> = rows.take(3).map(|r| r.unwrap()).collect();
    assert_eq!(first_three, vec![1, 2, 3]);
    assert_eq!(probe.fetches(), 3);
    assert_eq!(projected.get(), 3);
    assert_eq!(probe.live(), 0);
}

#[test]
fn test_scalar_returns_backend_value() {
    let (layer, _probe) = scripted_layer(Script {
        scalar: Value::Text("hello".to_string()),
        ..Script::default()
    });
    assert_eq!(
        layer.scalar(&Statement::new("SELECT greeting")).unwrap(),
        Value::Text("hello".to_string())
    );
}

#[test]
fn test_insert_returns_reported_identity() {
    for (identity, expected) in [
        (Value::Integer(42), 42),
        (Value::Text("17".to_string()), 17),
        (Value::Real(9.0), 9),
    ] {
        let (layer, _probe) = scripted_layer(Script {
            identity,
            ..Script::default()
        });
        let id = layer
            .insert(&Statement::new("INSERT INTO T(x) VALUES(@x)").bind("@x", 5))
            .unwrap();
        assert_eq!(id, expected);
    }
}

#[test]
fn test_insert_without_identity_is_an_error() {
    for identity in [Value::Null, Value::Text("not a number".to_string())] {
        let (layer, probe) = scripted_layer(Script {
            identity,
            ..Script::default()
        });
        let result = layer.insert(&Statement::new("INSERT INTO T(x) VALUES(@x)").bind("@x", 5));
        assert!(matches!(result, Err(ConduitError::IdentityParse { .. })));
        assert_eq!(probe.live(), 0);
    }
}

#[test]
fn test_update_returns_exact_affected_count() {
    for affected in [0, 1, 250] {
        let (layer, _probe) = scripted_layer(Script {
            affected,
            ..Script::default()
        });
        assert_eq!(
            layer.update(&Statement::new("UPDATE T SET x=1")).unwrap(),
            affected
        );
        assert_eq!(
            layer.delete(&Statement::new("DELETE FROM T")).unwrap(),
            affected
        );
    }
}

#[test]
fn test_caller_id_is_passthrough() {
    let (driver, probe) = ScriptedDriver::new(Script::default());
    let layer = ExecutionLayer::new(driver, "scripted").with_caller_id("user-7");
    assert_eq!(layer.caller_id(), Some("user-7"));

    layer.update(&Statement::new("UPDATE T SET x=1")).unwrap();
    assert!(probe.commands()[0].parameters().is_empty());
}
