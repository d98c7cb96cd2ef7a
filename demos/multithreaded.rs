use std::sync::Arc;
use std::thread;

use gatekeep::{evaluate_feature, Context, FeatureDefinitions};

fn main() {
    let features = Arc::new(
        FeatureDefinitions::from_json(
            r#"{
                "new-search": {
                    "defaultValue": false,
                    "rules": [
                        {"condition": {"age": {"$lt": 18}}, "force": false},
                        {"force": true, "coverage": 0.5}
                    ]
                }
            }"#,
        )
        .expect("failed to compile features"),
    );

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let features = Arc::clone(&features);
            thread::spawn(move || {
                let ctx = Context::new()
                    .with_attribute("id", format!("user-{i}"))
                    .with_attribute("age", 16 + i);

                let result = evaluate_feature(&features, &ctx, "new-search");
                println!("Thread {i}: {result}");
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}
