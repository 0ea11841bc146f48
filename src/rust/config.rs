// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    fs::File,
    io::Read,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Scheduler options.
mod scheduler_config {
    pub const SECTION_NAME: &str = "catwheel";
    // Total number of core slots.
    pub const CORE_COUNT: &str = "core_count";
    // Role table: core slots that may become service cores.
    pub const SERVICE_CORES: &str = "service_cores";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Scheduler configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        Self::from_yaml(&config_s)
    }

    /// Parses a configuration from a YAML string.
    pub fn from_yaml(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(_) => return Err(Fail::new(libc::EINVAL, "malformed yaml")),
        };
        let config_obj: &Yaml = match &config[..] {
            [c] => c,
            _ => return Err(Fail::new(libc::EINVAL, "wrong number of config objects")),
        };

        Ok(Self(config_obj.clone()))
    }

    /// Total number of core slots.
    pub fn core_count(&self) -> Result<usize, Fail> {
        match self.get_scheduler_config()?[scheduler_config::CORE_COUNT].as_i64() {
            Some(core_count) if core_count > 0 => Ok(core_count as usize),
            _ => Err(Fail::new(libc::EINVAL, "missing or invalid core_count")),
        }
    }

    /// Role table: which core slots may become service cores. `None` when the
    /// configuration does not constrain eligibility.
    pub fn service_cores(&self) -> Result<Option<Vec<usize>>, Fail> {
        let section: &Yaml = self.get_scheduler_config()?;
        let list: &Yaml = &section[scheduler_config::SERVICE_CORES];
        if list.is_badvalue() {
            return Ok(None);
        }
        let entries: &Vec<Yaml> = match list.as_vec() {
            Some(entries) => entries,
            None => return Err(Fail::new(libc::EINVAL, "service_cores is not a list")),
        };

        let mut cores: Vec<usize> = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.as_i64() {
                Some(core) if core >= 0 => cores.push(core as usize),
                _ => return Err(Fail::new(libc::EINVAL, "invalid service core id")),
            }
        }
        Ok(Some(cores))
    }

    fn get_scheduler_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, scheduler_config::SECTION_NAME)
    }

    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match &yaml[index] {
            section if section.is_badvalue() => Err(Fail::new(libc::EINVAL, "missing config section")),
            section => Ok(section),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
