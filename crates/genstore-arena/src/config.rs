//! Data store configuration parameters.

use crate::error::ArenaError;

/// Configuration for a [`DataStoreBase`](crate::DataStoreBase).
///
/// Validated at construction; all values are immutable after creation
/// except free-list and elem-hold-list participation, which can be toggled
/// on the store itself.
#[derive(Clone, Debug)]
pub struct ArenaConfig {
    /// Whether freed arrays are pushed on per-buffer free lists for reuse.
    ///
    /// Default: `true`.
    pub enable_free_lists: bool,

    /// Cap on the number of buffer slots, below the ref layout's limit.
    ///
    /// Default: `None` (use every buffer id the layout can address).
    pub max_buffers: Option<u32>,

    /// Initial capacity of the first-stage hold list.
    ///
    /// Default: 64.
    pub hold_list_capacity: usize,
}

impl ArenaConfig {
    /// Default initial hold list capacity.
    pub const DEFAULT_HOLD_LIST_CAPACITY: usize = 64;

    /// Check the config against the number of buffers a ref layout addresses.
    pub fn validate(&self, layout_buffers: u32) -> Result<(), ArenaError> {
        match self.max_buffers {
            Some(0) => Err(ArenaError::InvalidConfig {
                reason: "max_buffers must be >= 1".into(),
            }),
            Some(max) if max > layout_buffers => Err(ArenaError::InvalidConfig {
                reason: format!(
                    "max_buffers ({max}) exceeds the {layout_buffers} buffers the ref layout can address"
                ),
            }),
            _ => Ok(()),
        }
    }

    /// Number of buffer slots the store will create.
    pub fn effective_max_buffers(&self, layout_buffers: u32) -> u32 {
        self.max_buffers
            .map_or(layout_buffers, |max| max.min(layout_buffers))
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            enable_free_lists: true,
            max_buffers: None,
            hold_list_capacity: Self::DEFAULT_HOLD_LIST_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_free_lists() {
        let config = ArenaConfig::default();
        assert!(config.enable_free_lists);
        assert_eq!(config.hold_list_capacity, 64);
        assert!(config.validate(1024).is_ok());
        assert_eq!(config.effective_max_buffers(1024), 1024);
    }

    #[test]
    fn max_buffers_caps_layout() {
        let config = ArenaConfig {
            max_buffers: Some(8),
            ..ArenaConfig::default()
        };
        assert!(config.validate(1024).is_ok());
        assert_eq!(config.effective_max_buffers(1024), 8);
    }

    #[test]
    fn zero_or_oversized_max_buffers_rejected() {
        let zero = ArenaConfig {
            max_buffers: Some(0),
            ..ArenaConfig::default()
        };
        assert!(matches!(zero.validate(1024), Err(ArenaError::InvalidConfig { .. })));

        let big = ArenaConfig {
            max_buffers: Some(2048),
            ..ArenaConfig::default()
        };
        assert!(matches!(big.validate(1024), Err(ArenaError::InvalidConfig { .. })));
    }
}
