//! `proxygen demo`

use proxygen_engine::{Proxy, Value};
use serde::Serialize;

use super::Options;

#[derive(Serialize)]
struct Step {
    scenario: &'static str,
    call: String,
    result: String,
}

pub fn execute(options: &Options, json: bool) -> anyhow::Result<()> {
    let runtime = options.runtime()?;
    let factory = runtime.proxy("Entity")?;
    let entity = factory.create()?;
    let mut steps = Vec::new();
    let mut record = |scenario: &'static str, call: &str, value: Value| -> anyhow::Result<()> {
        steps.push(Step {
            scenario,
            call: call.to_string(),
            result: value.to_display()?,
        });
        Ok(())
    };

    record("field", "getX()", entity.invoke("getX", &[])?)?;
    entity.invoke("setX", &[Value::Int(9)])?;
    record("field", "setX(9); getX()", entity.invoke("getX", &[])?)?;

    record("private", "greet()", entity.invoke("greet", &[])?)?;

    record("overload", "add(2, 3)", entity.invoke("add", &[Value::Int(2), Value::Int(3)])?)?;
    record(
        "overload",
        "add(2.0, 3.0)",
        entity.invoke("add", &[Value::Double(2.0), Value::Double(3.0)])?,
    )?;

    let location = runtime
        .proxy("Location")?
        .invoke("construct", &[Value::Double(4.0), Value::Double(5.0)])?;
    entity.invoke("moveTo", &[location])?;
    let moved = entity.invoke("getLocation", &[])?;
    let moved = Proxy::from_value(&moved)
        .ok_or_else(|| anyhow::anyhow!("getLocation did not return a proxy"))?;
    record("nested", "moveTo(construct(4.0, 5.0)); getLocation()", moved.instance()?)?;

    let bound_create = match entity.create() {
        Ok(_) => "created".to_string(),
        Err(e) => e.to_string(),
    };
    steps.push(Step {
        scenario: "guard",
        call: "bound.create()".to_string(),
        result: bound_create,
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
    } else {
        println!("Target: {}", runtime.selection()?);
        for step in &steps {
            println!("[{}] {} = {}", step.scenario, step.call, step.result);
        }
    }
    Ok(())
}
