pub mod config;

pub use config::{
    load_config, parse_config, Action, Config, Project, SearchFor, Startup, WILDCARD_GROUP,
};
