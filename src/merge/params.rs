//! Merge parameters
//!
//! String-keyed parameters handed to a merge by the offline scheduler.

use std::collections::HashMap;

use crate::error::{LayerError, Result};

pub const DROP_DELETE_KEY: &str = "drop_delete_key";
pub const CURRENT_TIME_IN_SECOND: &str = "current_time_in_second";

/// Parsed merge parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeParams {
    /// Physically drop tombstones instead of carrying them forward
    pub drop_delete_key: bool,
    /// Reference time for the TTL filter; set only when the index has TTL
    pub current_time: Option<u64>,
}

impl MergeParams {
    /// Parse `params`. `drop_delete_key` is always required;
    /// `current_time_in_second` only when `ttl_enabled`.
    pub fn from_map(params: &HashMap<String, String>, ttl_enabled: bool) -> Result<Self> {
        let raw = params.get(DROP_DELETE_KEY).ok_or_else(|| {
            LayerError::InvalidArgs(format!("merge parameter {} is required", DROP_DELETE_KEY))
        })?;
        let drop_delete_key = raw.trim().parse::<bool>().map_err(|_| {
            LayerError::InvalidArgs(format!("{} must be true or false, got {:?}", DROP_DELETE_KEY, raw))
        })?;

        let current_time = if ttl_enabled {
            let raw = params.get(CURRENT_TIME_IN_SECOND).ok_or_else(|| {
                LayerError::InvalidArgs(format!(
                    "merge parameter {} is required when TTL is enabled",
                    CURRENT_TIME_IN_SECOND
                ))
            })?;
            Some(raw.trim().parse::<u64>().map_err(|_| {
                LayerError::InvalidArgs(format!(
                    "{} must be an integer, got {:?}",
                    CURRENT_TIME_IN_SECOND, raw
                ))
            })?)
        } else {
            None
        };

        Ok(Self {
            drop_delete_key,
            current_time,
        })
    }
}
