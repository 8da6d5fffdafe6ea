//! Shared setup for the bridge integration tests.

#![allow(dead_code)]

use gmt_bridge::{BridgeConfig, Engine};
use gmt_bridge_test::{init_test_logging, mock_library, mock_library_variant, MockVariant, TEST_CONFIG_TOML};

pub fn test_config() -> BridgeConfig {
    BridgeConfig::from_toml_str(TEST_CONFIG_TOML).unwrap()
}

/// An engine over the standard mock library.
pub fn engine() -> Engine {
    init_test_logging();
    Engine::new(mock_library(), test_config()).unwrap()
}

/// An engine over a mock library variant.
pub fn engine_with(variant: MockVariant, config: BridgeConfig) -> Engine {
    init_test_logging();
    Engine::new(mock_library_variant(variant), config).unwrap()
}
