//! Channel indirection.
//!
//! One physical instrument can expose several identical sub-units (output 1 and 2
//! of a function generator, trace 1..4 of a spectrum analyzer). Each [`Channel`]
//! substitutes its own id into the shared descriptor templates and routes the call
//! through the parent's transport.
//!
//! The parent owns the transport; channels only hold a weak reference to it, so a
//! channel that outlives its instrument fails with
//! [`DriverError::ChannelDetached`] instead of keeping the link open.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

use crate::adapters::Transport;
use crate::descriptor::{Descriptor, DescriptorTable};
use crate::engine::CommandEngine;
use crate::error::{DriverError, Result};
use crate::value::Value;
use crate::variant::ensure_variant;

/// Transport shared between an instrument and its channels.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Identifier substituted for `{ch}` in templates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        ChannelId(id.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        ChannelId(id)
    }
}

impl From<u32> for ChannelId {
    fn from(id: u32) -> Self {
        ChannelId(id.to_string())
    }
}

/// An addressable sub-unit of an instrument.
pub struct Channel {
    parent: Weak<Mutex<Box<dyn Transport>>>,
    id: ChannelId,
    descriptors: Arc<DescriptorTable>,
    variant: Option<String>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("descriptors", &self.descriptors.len())
            .field("attached", &(self.parent.strong_count() > 0))
            .finish()
    }
}

impl Channel {
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.descriptors
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        let descriptor = self.lookup(name)?;
        let transport = self.transport()?;
        let mut link = transport.lock();
        CommandEngine::get(&mut **link, descriptor, Some(&self.id))
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let descriptor = self.lookup(name)?;
        let transport = self.transport()?;
        let mut link = transport.lock();
        CommandEngine::set(&mut **link, descriptor, Some(&self.id), &value)
    }

    pub fn execute(&self, name: &str) -> Result<()> {
        let descriptor = self.lookup(name)?;
        let transport = self.transport()?;
        let mut link = transport.lock();
        CommandEngine::execute(&mut **link, descriptor, Some(&self.id))
    }

    pub(crate) fn set_variant(&mut self, variant: &str) {
        self.variant = Some(variant.to_string());
    }

    fn lookup(&self, name: &str) -> Result<&Descriptor> {
        let descriptor = self.descriptors.get(name)?;
        ensure_variant(
            descriptor.required_variant.as_deref(),
            self.variant.as_deref(),
        )?;
        Ok(descriptor)
    }

    fn transport(&self) -> Result<SharedTransport> {
        self.parent
            .upgrade()
            .ok_or_else(|| DriverError::ChannelDetached(self.id.to_string()))
    }
}

/// Create one channel per id, all sharing `parent` and `descriptors`.
///
/// Ids must be unique. The returned order is the order of `ids`.
pub fn create_channels<I, C>(
    parent: &SharedTransport,
    ids: I,
    descriptors: Arc<DescriptorTable>,
    variant: Option<&str>,
) -> Result<Vec<Channel>>
where
    I: IntoIterator<Item = C>,
    C: Into<ChannelId>,
{
    let mut seen = HashSet::new();
    let mut channels = Vec::new();
    for id in ids {
        let id = id.into();
        if !seen.insert(id.clone()) {
            return Err(DriverError::DuplicateChannel(id.to_string()));
        }
        channels.push(Channel {
            parent: Arc::downgrade(parent),
            id,
            descriptors: Arc::clone(&descriptors),
            variant: variant.map(str::to_string),
        });
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;

    fn shared(mock: &MockTransport) -> SharedTransport {
        Arc::new(Mutex::new(Box::new(mock.clone()) as Box<dyn Transport>))
    }

    fn table() -> Arc<DescriptorTable> {
        DescriptorTable::from_descriptors([Descriptor::measurement(
            "average_number",
            ":AVERage:TRACe{ch}?",
        )])
        .unwrap()
        .into_shared()
    }

    #[test]
    fn test_each_channel_uses_its_own_id() {
        let mock = MockTransport::new().with_default_reply("3");
        let parent = shared(&mock);
        let channels = create_channels(&parent, [1u32, 2, 3, 4], table(), None).unwrap();
        for channel in &channels {
            channel.get("average_number").unwrap();
        }
        assert_eq!(
            mock.call_log()
                .iter()
                .filter(|l| l.starts_with("write"))
                .cloned()
                .collect::<Vec<_>>(),
            vec![
                "write: :AVERage:TRACe1?",
                "write: :AVERage:TRACe2?",
                "write: :AVERage:TRACe3?",
                "write: :AVERage:TRACe4?"
            ]
        );
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let parent = shared(&MockTransport::new());
        assert!(matches!(
            create_channels(&parent, ["1", "2", "1"], table(), None),
            Err(DriverError::DuplicateChannel(_))
        ));
    }

    #[test]
    fn test_channel_detached_after_parent_drop() {
        let parent = shared(&MockTransport::new());
        let channels = create_channels(&parent, ["1"], table(), None).unwrap();
        drop(parent);
        assert!(matches!(
            channels[0].get("average_number"),
            Err(DriverError::ChannelDetached(_))
        ));
    }
}
