//! End-to-end demo: per-entity eligibility with partial evaluation.
//!
//! Run with: `cargo run -p factgraph-graph --example eligibility`

use anyhow::Result;
use serde_json::json;

use factgraph_graph::{Evaluator, Namespace, Value};
use factgraph_schema::rules::RuleSchema;

fn declare(ns: &Namespace) {
    ns.in_module("household", |m| {
        m.constant("income_limit", json!(2500));

        m.fact("size", |f| {
            f.input("household_size", RuleSchema::integer("household_size").min(1));
            f.resolver(|d| {
                d.must_match(|d| Some(Value::computed(d.input_value("household_size")?.clone())))
            });
        });
    });

    ns.in_module("applicants", |m| {
        m.fact("monthly_income", |f| {
            f.per_entity("applicants");
            f.input_per_entity("monthly_income", RuleSchema::integer("monthly_income").min(0));
            f.resolver(|d| {
                d.must_match(|d| Some(Value::computed(d.input_value("monthly_income")?.clone())))
            });
        });

        m.fact("eligible", |f| {
            f.per_entity("applicants");
            f.allow_unmet_dependencies();
            f.dependency("monthly_income");
            f.dependency_from("income_limit", "household");
            f.resolver(|d| {
                d.must_match(|d| {
                    let income = d.dependency_computed("monthly_income")?.as_i64()?;
                    let limit = d.dependency_computed("income_limit")?.as_i64()?;
                    Some(Value::computed(json!(income <= limit)))
                })
            });
        });

        m.fact("num_eligible", |f| {
            f.dependency("eligible");
            f.resolver(|d| {
                d.must_match(|d| {
                    let fan_out = d.dependency_fan_out("eligible")?;
                    let count = fan_out
                        .values()
                        .filter(|v| v.as_computed().and_then(|p| p.as_bool()) == Some(true))
                        .count();
                    Some(Value::computed(json!(count)))
                })
            });
        });
    });
}

fn main() -> Result<()> {
    let ns = Namespace::root("eligibility_demo");
    declare(&ns);
    let evaluator = Evaluator::for_namespace(&ns);

    let complete = json!({
        "household_size": 3,
        "applicants": [
            { "monthly_income": 1900 },
            { "monthly_income": 3400 },
            { "monthly_income": 800 },
        ],
    });
    let results = evaluator.evaluate(&complete)?;
    println!("complete input:\n{}\n", serde_json::to_string_pretty(&results)?);

    // Partial input: per-applicant incomes are missing, so `eligible`
    // defers and `num_eligible` reports its dependency unmet.
    let partial = json!({ "household_size": 3, "applicants": [{}, {}] });
    let results = evaluator.evaluate(&partial)?;
    println!("partial input:\n{}\n", serde_json::to_string_pretty(&results)?);
    println!(
        "rejected inputs: {}",
        serde_json::to_string_pretty(&results.input_errors())?
    );

    Ok(())
}
