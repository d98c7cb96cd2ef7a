use std::collections::BTreeMap;

use gatekeep::{field, ClientBuilder, Context, Experiment, FeatureRule, FeatureSetBuilder};

fn main() {
    let experiment = Experiment::from_legacy(
        "checkout-flow",
        ["classic", "one-page", "express"],
        Some(&[0.5, 0.25, 0.25][..]),
        0.8,
    )
    .expect("weights are valid")
    .with_name("Checkout flow");

    let features = FeatureSetBuilder::new()
        .feature("checkout", |f| {
            f.default_value("classic")
                .rule(FeatureRule::force("classic").when(field("country").equals("JP")))
                .rule(FeatureRule::experiment(experiment.clone()).with_id("checkout-test"))
        })
        .build()
        .expect("features are valid");

    let client = ClientBuilder::new(Context::new()).features(features).build();
    let _exposures = client.on_exposure(|experiment, result| {
        if result.value() == "express" {
            println!(
                "  exposure: {} -> {} (user {})",
                experiment.key,
                result.key(),
                result.hash_value()
            );
        }
    });

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for i in 0..1000 {
        client.set_attributes(gatekeep::Attributes::new().set("id", format!("user-{i}")));
        let result = client.evaluate_feature("checkout");
        let bucket = match result.experiment_result() {
            Some(assignment) if assignment.in_experiment() => result.value().to_string(),
            _ => format!("{} (not enrolled)", result.value()),
        };
        *counts.entry(bucket).or_default() += 1;
    }

    println!("assignments over 1000 users:");
    for (variant, count) in &counts {
        println!("  {variant}: {count}");
    }
    println!("distinct exposures reported: {}", client.tracked_exposures());

    // A forced variation wins over hashing and is not reported.
    let forced = Context::new()
        .with_attribute("id", "user-1")
        .with_forced_variation("checkout-flow", 2);
    client.set_context(forced);
    println!("forced: {}", client.run_experiment(&experiment));
}
