//! End-to-end scenarios over the `game.Entity` fixture

mod common;

use proxygen_engine::{Proxy, Value};

#[test]
fn test_public_field_read_and_write() {
    let runtime = common::runtime();
    let entity = runtime.proxy("Entity").unwrap().create().unwrap();

    assert_eq!(entity.invoke("getX", &[]).unwrap().as_int(), Some(7));
    entity.invoke("setX", &[Value::Int(9)]).unwrap();
    assert_eq!(entity.invoke("getX", &[]).unwrap().as_int(), Some(9));

    let raw = entity.instance().unwrap();
    assert_eq!(raw.expect_object().unwrap().field("x").unwrap().as_int(), Some(9));
}

#[test]
fn test_private_method_through_handle() {
    let runtime = common::runtime();
    let entity = runtime.proxy("Entity").unwrap().create().unwrap();

    let greeting = entity.invoke("greet", &[]).unwrap();
    assert_eq!(greeting.as_str(), Some("hi"));

    let greet = runtime
        .mappings("Entity")
        .unwrap()
        .into_iter()
        .find(|m| m.method == "String greet()")
        .unwrap();
    assert_eq!(greet.dispatch, "handle");
    assert_eq!(greet.slot.as_deref(), Some("greet"));
}

#[test]
fn test_private_overloads() {
    let runtime = common::runtime();
    let entity = runtime.proxy("Entity").unwrap().create().unwrap();

    let sum = entity.invoke("add", &[Value::Int(2), Value::Int(3)]).unwrap();
    assert_eq!(sum.as_int(), Some(5));
    let product = entity
        .invoke("add", &[Value::Double(2.0), Value::Double(3.0)])
        .unwrap();
    assert_eq!(product.as_double(), Some(6.0));

    let mut slots: Vec<String> = runtime
        .mappings("Entity")
        .unwrap()
        .into_iter()
        .filter(|m| m.method.contains(" add("))
        .filter_map(|m| m.slot)
        .collect();
    slots.sort();
    assert_eq!(slots, vec!["add0".to_string(), "add1".to_string()]);
}

#[test]
fn test_proxy_return_and_argument() {
    let runtime = common::runtime();
    let entity = runtime.proxy("Entity").unwrap().create().unwrap();

    let location = Proxy::from_value(&entity.invoke("getLocation", &[]).unwrap()).unwrap();
    assert_eq!(location.proxy_class().name(), "Location$Proxy");
    assert_eq!(location.invoke("getX", &[]).unwrap().as_double(), Some(1.0));
    assert_eq!(location.invoke("getY", &[]).unwrap().as_double(), Some(2.0));

    let factory = runtime.proxy("Location").unwrap();
    let moved = Proxy::from_value(
        &factory
            .invoke("construct", &[Value::Double(5.0), Value::Double(6.0)])
            .unwrap(),
    )
    .unwrap();
    entity.invoke("moveTo", &[moved.as_value()]).unwrap();

    let current = Proxy::from_value(&entity.invoke("getLocation", &[]).unwrap()).unwrap();
    assert_eq!(current.invoke("getX", &[]).unwrap().as_double(), Some(5.0));
    assert!(current.equals(&moved.instance().unwrap()).unwrap());
}
