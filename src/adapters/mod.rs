//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements          | Connects to                       |
//! |-------------|---------------------|-----------------------------------|
//! | `log_sink`  | EventSink           | `log` facade (serial / terminal)  |
//! | `pins`      | EndstopInputs       | embedded-hal input pins           |
//! | `servo`     | ServoPort           | embedded-hal PWM channels         |
//! | `settings`  | SettingsPort        | postcard blob (EEPROM / flash)    |
//! | `sim`       | every ProbeHost port| simulated delta machine           |
//! |             | MeshSink            | in-memory mesh                    |

pub mod log_sink;
pub mod pins;
pub mod servo;
pub mod settings;
pub mod sim;
