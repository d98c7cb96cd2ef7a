use gatekeep::{Attributes, Client, Context};

const FEATURES: &str = r#"{
    "dark-mode": {
        "defaultValue": false,
        "rules": [{"condition": {"plan": "pro"}, "force": true}]
    },
    "shipping": {
        "defaultValue": "international",
        "rules": [{"condition": {"country": {"$in": ["US", "CA"]}}, "force": "domestic"}]
    },
    "max-uploads": {"defaultValue": 5}
}"#;

fn main() {
    let context = Context::new()
        .with_attribute("id", "user-42")
        .with_attribute("plan", "pro")
        .with_attribute("country", "CA");

    let client = Client::new(context);
    client
        .set_features_json(FEATURES)
        .expect("features payload is a JSON object");

    println!("{}", client.features());
    println!("dark-mode:   {}", client.evaluate_feature("dark-mode"));
    println!("shipping:    {}", client.evaluate_feature("shipping"));
    println!("max-uploads: {}", client.feature_value_as("max-uploads", 1_u32));
    println!("unknown:     {}", client.evaluate_feature("does-not-exist"));

    // Attributes can change between evaluations.
    client.set_attributes(Attributes::new().set("id", "user-42").set("plan", "free"));
    println!("dark-mode after downgrade: {}", client.is_on("dark-mode"));
}
