// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Assist configuration.

use serde::Deserialize;
use serde::Serialize;

/// The support level STEVL reports unless configured otherwise.
pub const DEFAULT_LEVEL: u32 = 20;

/// Static configuration of the ECPS:VM facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EcpsVmConfig {
    /// The facility is installed. When it is not, CP assists raise an
    /// operation exception and VM assists always decline.
    pub available: bool,
    /// Level stored by STEVL.
    pub level: u32,
    /// Initial debug setting for every assist.
    pub debug: bool,
    /// Assists, by mnemonic, that start out disabled.
    pub disabled: Vec<String>,
}

impl Default for EcpsVmConfig {
    fn default() -> Self {
        Self {
            available: false,
            level: DEFAULT_LEVEL,
            debug: false,
            disabled: Vec::new(),
        }
    }
}
