const SECRET_KEYS: [&str; 3] = ["SUNSET_WIFI_SSID", "SUNSET_WIFI_PASS", "SUNSET_LIFX_TOKEN"];

fn main() {
    println!("cargo:rerun-if-changed=secrets.env");
    for key in SECRET_KEYS {
        println!("cargo:rerun-if-env-changed={key}");
    }

    // Missing file is fine: values may come from the environment or NVS.
    if let Err(err) = dotenvy::from_filename("secrets.env") {
        println!("cargo:warning=secrets.env not loaded ({err}); relying on environment/NVS");
    }

    for key in SECRET_KEYS {
        if let Ok(value) = std::env::var(key) {
            println!("cargo:rustc-env={key}={value}");
        }
    }

    if std::env::var("CARGO_FEATURE_ESP32").is_ok() {
        embuild::espidf::sysenv::output();
    }
}
