//! Hello Plugin - A simple example plugin for plugrack
//!
//! This plugin demonstrates:
//! - Basic plugin structure with the `export_plugin!` macro
//! - Implementing the `Plugin` trait
//! - Exposing capabilities through `invoke`
//!
//! ## Building
//!
//! ```bash
//! cargo build --release
//! ```
//!
//! ## Installing
//!
//! The file name carries the plugin type (`greeter/hello`):
//!
//! ```bash
//! mkdir -p ~/.config/plugrack/plugins
//! cp target/release/libhello_plugin.so ~/.config/plugrack/plugins/greeter_hello.so
//! plugrack use hello --invoke greet --input '{"name": "rack"}'
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use plugrack_plugin_api::{Plugin, PluginDescriptor, PluginError, PluginType, export_plugin};
use serde_json::{Value, json};

/// Greets callers and counts how many greetings it handed out.
#[derive(Default)]
pub struct HelloPlugin {
    greetings: AtomicU64,
}

impl Plugin for HelloPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(
            "hello-plugin",
            PluginType::new("greeter", "hello"),
            env!("CARGO_PKG_VERSION"),
        )
    }

    fn on_load(&mut self) -> Result<(), PluginError> {
        self.greetings.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn on_unload(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["greet".to_string(), "stats".to_string()]
    }

    fn invoke(&self, capability: &str, input: &Value) -> Result<Value, PluginError> {
        match capability {
            "greet" => {
                let name = match input {
                    Value::Null => "world",
                    Value::Object(map) => map
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| PluginError::invalid_input("expected {\"name\": string}"))?,
                    _ => return Err(PluginError::invalid_input("expected an object or null")),
                };
                let count = self.greetings.fetch_add(1, Ordering::Relaxed) + 1;
                Ok(json!({ "greeting": format!("Hello, {name}!"), "count": count }))
            }
            "stats" => Ok(json!({ "greetings": self.greetings.load(Ordering::Relaxed) })),
            other => Err(PluginError::unknown_capability(other)),
        }
    }
}

// This macro generates the C ABI entry points for dynamic loading
#[cfg(not(feature = "faulty-type"))]
export_plugin!(HelloPlugin, "greeter/hello");

#[cfg(feature = "faulty-type")]
export_plugin!(HelloPlugin, "greeter/impostor");
