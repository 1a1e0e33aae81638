use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use factgraph_graph::{Evaluator, Namespace, Value};
use factgraph_schema::key_path;
use factgraph_schema::rules::{Member, RuleSchema};

/// Constants and simple math: `simple.two`, `math.pi`, `math.squared_scale`
/// (input `scale`), `circles.areas` (input `circles`, depends on both math
/// facts).
fn circle_namespace() -> Namespace {
    let ns = Namespace::root("fact_graph");

    ns.in_module("simple", |m| {
        m.constant("two", json!(2));
    });

    ns.in_module("math", |m| {
        m.constant("pi", json!(3.14));
        m.fact("squared_scale", |f| {
            f.input("scale", RuleSchema::numeric("scale").min(0));
            f.resolver(|data| {
                data.must_match(|d| {
                    let scale = d.input_value("scale")?.as_f64()?;
                    Some(Value::computed(json!(scale * scale)))
                })
            });
        });
    });

    ns.in_module("circles", |m| {
        m.fact("areas", |f| {
            f.input(
                "circles",
                RuleSchema::array_of("circles", vec![Member::integer("radius").min(0)]),
            );
            f.dependency_from("pi", "math");
            f.dependency_from("squared_scale", "math");
            f.resolver(|data| {
                data.must_match(|d| {
                    let pi = d.dependency_computed("pi")?.as_f64()?;
                    let scale = d.dependency_computed("squared_scale")?.as_f64()?;
                    let circles = d.input_value("circles")?.as_array()?;
                    let mut areas = Vec::with_capacity(circles.len());
                    for circle in circles {
                        let radius = circle.get("radius")?.as_f64()?;
                        areas.push(json!(pi * radius * radius * scale));
                    }
                    Some(Value::computed(json!(areas)))
                })
            });
        });
    });

    ns
}

/// Per-entity income/eligibility with a scalar aggregator.
fn applicant_namespace() -> Namespace {
    let ns = Namespace::root("eligibility");

    ns.in_module("applicants", |m| {
        m.fact("income", |f| {
            f.per_entity("applicants");
            f.input_per_entity("income", RuleSchema::integer("income"));
            f.resolver(|data| {
                data.must_match(|d| Some(Value::computed(d.input_value("income")?.clone())))
            });
        });

        m.fact("eligible", |f| {
            f.per_entity("applicants");
            f.allow_unmet_dependencies();
            f.dependency("income");
            f.resolver(|data| {
                data.must_match(|d| {
                    let income = d.dependency_computed("income")?.as_i64()?;
                    Some(Value::computed(json!(income < 100)))
                })
            });
        });

        m.fact("num_eligible", |f| {
            f.dependency("eligible");
            f.resolver(|data| {
                data.must_match(|d| {
                    let eligible = d.dependency_fan_out("eligible")?;
                    let count = eligible
                        .values()
                        .filter(|v| v.as_computed().and_then(|p| p.as_bool()) == Some(true))
                        .count();
                    Some(Value::computed(json!(count)))
                })
            });
        });
    });

    ns
}

fn computed_f64(results: &factgraph_graph::Results, module: &str, name: &str) -> f64 {
    results
        .value(module, name)
        .and_then(Value::as_computed)
        .and_then(|p| p.as_f64())
        .expect("computed numeric fact")
}

#[test]
fn constants_and_simple_math_compute_end_to_end() -> Result<()> {
    let evaluator = Evaluator::for_namespace(&circle_namespace());
    let input = json!({ "scale": 5, "circles": [{ "radius": 1 }, { "radius": 2 }] });

    let results = evaluator.evaluate(&input)?;

    assert_eq!(results.value("simple", "two"), Some(&Value::computed(json!(2))));
    assert_eq!(
        results.value("math", "pi"),
        Some(&Value::computed(json!(3.14)))
    );
    assert_eq!(computed_f64(&results, "math", "squared_scale"), 25.0);

    let areas = results
        .value("circles", "areas")
        .and_then(Value::as_computed)
        .and_then(|p| p.as_array())
        .expect("computed areas");
    assert_eq!(areas.len(), 2);
    assert!((areas[0].as_f64().expect("area") - 78.5).abs() < 1e-9);
    assert!((areas[1].as_f64().expect("area") - 314.0).abs() < 1e-9);

    Ok(())
}

#[test]
fn empty_input_reports_bad_inputs_and_unmet_dependencies() -> Result<()> {
    let evaluator = Evaluator::for_namespace(&circle_namespace());
    let results = evaluator.evaluate(&json!({}))?;

    let squared = results
        .value("math", "squared_scale")
        .and_then(Value::as_errors)
        .expect("squared_scale errors");
    assert_eq!(
        squared.bad_inputs[&key_path!["scale"]],
        ["must be Numeric".to_string()].into()
    );
    assert!(squared.dependency_unmet.is_empty());

    let areas = results
        .value("circles", "areas")
        .and_then(Value::as_errors)
        .expect("areas errors");
    assert_eq!(
        areas.bad_inputs[&key_path!["circles"]],
        ["must be an array".to_string()].into()
    );
    // `pi` computed, `squared_scale` errored: only the latter is unmet.
    assert_eq!(areas.dependency_unmet.len(), 1);
    assert_eq!(
        areas.dependency_unmet["math"],
        ["squared_scale".into()].into()
    );

    Ok(())
}

#[test]
fn partial_input_errors_only_what_is_missing() -> Result<()> {
    let evaluator = Evaluator::for_namespace(&circle_namespace());
    let results = evaluator.evaluate(&json!({ "scale": 5 }))?;

    assert_eq!(computed_f64(&results, "math", "squared_scale"), 25.0);

    let areas = results
        .value("circles", "areas")
        .and_then(Value::as_errors)
        .expect("areas errors");
    assert_eq!(
        areas.bad_inputs[&key_path!["circles"]],
        ["must be an array".to_string()].into()
    );
    // All dependencies computed, so nothing is unmet.
    assert!(areas.dependency_unmet.is_empty());

    Ok(())
}

#[test]
fn structured_bad_input_reports_element_paths() -> Result<()> {
    let evaluator = Evaluator::for_namespace(&circle_namespace());
    let input = json!({ "scale": 5, "circles": [{ "radius": "spoon" }, {}] });
    let results = evaluator.evaluate(&input)?;

    let areas = results
        .value("circles", "areas")
        .and_then(Value::as_errors)
        .expect("areas errors");
    assert_eq!(
        areas.bad_inputs[&key_path!["circles", 0, "radius"]],
        ["must be an integer".to_string()].into()
    );
    assert_eq!(
        areas.bad_inputs[&key_path!["circles", 1, "radius"]],
        ["is missing".to_string()].into()
    );
    assert!(areas.dependency_unmet.is_empty());

    Ok(())
}

#[test]
fn per_entity_facts_fan_out_and_aggregate() -> Result<()> {
    let evaluator = Evaluator::for_namespace(&applicant_namespace());
    let input = json!({ "applicants": [{ "income": 48 }, { "income": 380 }] });
    let results = evaluator.evaluate(&input)?;

    assert_eq!(
        results.entity_value("applicants", "eligible", 0),
        Some(&Value::computed(json!(true)))
    );
    assert_eq!(
        results.entity_value("applicants", "eligible", 1),
        Some(&Value::computed(json!(false)))
    );
    assert_eq!(
        results.value("applicants", "num_eligible"),
        Some(&Value::computed(json!(1)))
    );

    Ok(())
}

#[test]
fn absent_entity_collection_yields_empty_result_maps() -> Result<()> {
    let evaluator = Evaluator::for_namespace(&applicant_namespace());
    let results = evaluator.evaluate(&json!({}))?;

    let incomes = results
        .entity_values("applicants", "income")
        .expect("slot exists");
    assert!(incomes.is_empty());

    // The aggregator sees an empty fan-out, not an error.
    assert_eq!(
        results.value("applicants", "num_eligible"),
        Some(&Value::computed(json!(0)))
    );

    Ok(())
}

#[test]
fn input_errors_aggregate_across_the_whole_graph() -> Result<()> {
    let evaluator = Evaluator::for_namespace(&circle_namespace());
    let results = evaluator.evaluate(&json!({}))?;

    let errors = results.input_errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[&key_path!["scale"]], ["must be Numeric".to_string()].into());
    assert_eq!(
        errors[&key_path!["circles"]],
        ["must be an array".to_string()].into()
    );

    Ok(())
}

#[test]
fn resolvers_run_at_most_once_per_coordinate() -> Result<()> {
    let ns = Namespace::root("memo");
    let calls = Arc::new(AtomicUsize::new(0));

    ns.in_module("m", |m| {
        let counted = Arc::clone(&calls);
        m.fact("base", move |f| {
            let counted = Arc::clone(&counted);
            f.resolver(move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                Value::computed(json!(1))
            });
        });
        // A diamond: two consumers, one grand-consumer.
        m.fact("left", |f| {
            f.dependency("base");
            f.resolver(|d| {
                d.must_match(|d| Some(Value::computed(d.dependency_computed("base")?.clone())))
            });
        });
        m.fact("right", |f| {
            f.dependency("base");
            f.resolver(|d| {
                d.must_match(|d| Some(Value::computed(d.dependency_computed("base")?.clone())))
            });
        });
        m.fact("top", |f| {
            f.dependency("left");
            f.dependency("right");
            f.resolver(|_| Value::computed(json!("done")));
        });
    });

    let results = Evaluator::for_namespace(&ns).evaluate(&json!({}))?;
    assert_eq!(results.value("m", "top"), Some(&Value::computed(json!("done"))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    Ok(())
}

#[test]
fn error_fan_in_groups_unmet_dependencies_by_module() -> Result<()> {
    let ns = Namespace::root("fan_in");

    ns.in_module("a", |m| {
        m.fact("broken_one", |f| {
            f.input("x", RuleSchema::integer("x"));
            f.resolver(|d| d.must_match(|_| None));
        });
    });
    ns.in_module("b", |m| {
        m.fact("broken_two", |f| {
            f.input("y", RuleSchema::integer("y"));
            f.resolver(|d| d.must_match(|_| None));
        });
        m.fact("broken_three", |f| {
            f.input("z", RuleSchema::integer("z"));
            f.resolver(|d| d.must_match(|_| None));
        });
    });
    ns.in_module("sink", |m| {
        m.fact("downstream", |f| {
            f.dependency_from("broken_one", "a");
            f.dependency_from("broken_two", "b");
            f.dependency_from("broken_three", "b");
            f.resolver(|_| Value::computed(json!("unreachable")));
        });
    });

    let results = Evaluator::for_namespace(&ns).evaluate(&json!({}))?;
    let errors = results
        .value("sink", "downstream")
        .and_then(Value::as_errors)
        .expect("downstream errors");

    assert_eq!(errors.dependency_unmet.len(), 2);
    assert_eq!(errors.dependency_unmet["a"], ["broken_one".into()].into());
    assert_eq!(
        errors.dependency_unmet["b"],
        ["broken_two".into(), "broken_three".into()].into()
    );

    Ok(())
}

#[test]
fn allow_unmet_dependencies_defers_errors_to_the_resolver() -> Result<()> {
    let ns = Namespace::root("deferral");

    ns.in_module("m", |m| {
        // Default path: errors stored without invoking the resolver.
        m.fact("strict", |f| {
            f.input("n", RuleSchema::integer("n"));
            f.resolver(|_| Value::computed(json!("never")));
        });
        // Deferred path: the resolver runs and returns `data_errors()`.
        m.fact("deferred", |f| {
            f.allow_unmet_dependencies();
            f.input("n", RuleSchema::integer("n"));
            f.resolver(|d| {
                d.must_match(|d| {
                    let n = d.input_value("n")?.as_i64()?;
                    Some(Value::computed(json!(n + 1)))
                })
            });
        });
    });

    let results = Evaluator::for_namespace(&ns).evaluate(&json!({}))?;

    // Both paths surface the same structured error.
    assert_eq!(
        results.value("m", "strict"),
        results.value("m", "deferred")
    );
    let errors = results
        .value("m", "deferred")
        .and_then(Value::as_errors)
        .expect("deferred errors");
    assert_eq!(errors.bad_inputs[&key_path!["n"]], ["must be an integer".to_string()].into());

    Ok(())
}

#[test]
fn allow_unmet_resolver_observes_deferred_errors_and_may_compute() -> Result<()> {
    let ns = Namespace::root("deferral");
    let saw_errors = Arc::new(AtomicUsize::new(0));

    ns.in_module("m", |m| {
        let saw = Arc::clone(&saw_errors);
        m.fact("fallback", move |f| {
            let saw = Arc::clone(&saw);
            f.allow_unmet_dependencies();
            f.input("n", RuleSchema::integer("n"));
            f.resolver(move |d| {
                if d.deferred_errors().is_some() {
                    saw.fetch_add(1, Ordering::SeqCst);
                }
                match d.input_value("n").and_then(|v| v.as_i64()) {
                    Some(n) => Value::computed(json!(n)),
                    None => Value::computed(json!(0)),
                }
            });
        });
    });

    let results = Evaluator::for_namespace(&ns).evaluate(&json!({}))?;
    // The resolver ran, saw the errors, and chose a fallback value.
    assert_eq!(saw_errors.load(Ordering::SeqCst), 1);
    assert_eq!(results.value("m", "fallback"), Some(&Value::computed(json!(0))));

    Ok(())
}

#[test]
fn must_match_without_deferred_errors_yields_incomplete() -> Result<()> {
    let ns = Namespace::root("sentinel");

    ns.in_module("m", |m| {
        m.fact("undetermined", |f| {
            // No inputs, no dependencies: nothing is unmet, but the match
            // still fails.
            f.resolver(|d| d.must_match(|_| None));
        });
    });

    let results = Evaluator::for_namespace(&ns).evaluate(&json!({}))?;
    assert_eq!(results.value("m", "undetermined"), Some(&Value::Incomplete));

    Ok(())
}

#[test]
fn undeclared_input_keys_are_filtered_before_validation() -> Result<()> {
    let ns = Namespace::root("filtering");

    ns.in_module("m", |m| {
        m.fact("echo", |f| {
            f.input("scale", RuleSchema::numeric("scale"));
            f.resolver(|d| Value::computed(d.input().clone()));
        });
    });

    let input = json!({ "scale": 5, "unrelated": true, "extra": [1, 2, 3] });
    let results = Evaluator::for_namespace(&ns).evaluate(&input)?;

    // The resolver saw only the declared key.
    assert_eq!(
        results.value("m", "echo"),
        Some(&Value::computed(json!({ "scale": 5 })))
    );

    Ok(())
}

#[test]
fn missing_dependency_reference_is_fatal() {
    let ns = Namespace::root("broken");

    ns.in_module("m", |m| {
        m.fact("dangling", |f| {
            f.dependency_from("ghost", "nowhere");
            f.resolver(|_| Value::computed(json!(1)));
        });
    });

    let error = Evaluator::for_namespace(&ns)
        .evaluate(&json!({}))
        .expect_err("missing dependency must abort");
    let message = error.to_string();
    assert!(message.contains("m.dangling"));
    assert!(message.contains("nowhere.ghost"));
}

#[test]
fn module_filter_restricts_evaluation() -> Result<()> {
    let evaluator = Evaluator::for_namespace(&circle_namespace());
    let results = evaluator.evaluate_modules(&json!({}), &["simple".into()])?;

    assert_eq!(results.value("simple", "two"), Some(&Value::computed(json!(2))));
    assert!(results.get("math", "pi").is_none());
    assert!(results.get("circles", "areas").is_none());

    Ok(())
}
