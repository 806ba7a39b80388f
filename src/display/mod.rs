// src/display/mod.rs
//! On-screen display control
//!
//! Primary and focused instances are made visible by toggling overlay
//! sources named `<prefix><num>` ("active3", "focused3"). Every call goes
//! through [`DisplayHandle`], which turns controller failures into logged
//! no-ops so an unreachable overlay never stops the scheduler.

pub mod socket;

pub use socket::SocketDisplay;

use crate::utils::errors::Result;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One overlay source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneItem {
    pub name: String,
    pub id: i64,
}

/// Overlay control capability
pub trait DisplayController: Send + Sync {
    fn set_visible<'a>(&'a self, source: &'a str, visible: bool) -> BoxFuture<'a, Result<()>>;

    fn list_scene_items(&self) -> BoxFuture<'_, Result<Vec<SceneItem>>>;
}

/// Controller used when the overlay is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDisplay;

impl DisplayController for NoopDisplay {
    fn set_visible<'a>(&'a self, _source: &'a str, _visible: bool) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn list_scene_items(&self) -> BoxFuture<'_, Result<Vec<SceneItem>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// In-memory overlay that remembers visibility, for test mode and tests
#[derive(Debug, Default)]
pub struct MemoryDisplay {
    visible: Mutex<HashMap<String, bool>>,
    calls: Mutex<Vec<(String, bool)>>,
}

impl MemoryDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate sources so `list_scene_items` reports them
    pub fn with_items<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let display = Self::new();
        {
            let mut visible = display.visible.lock();
            for name in names {
                visible.insert(name.into(), false);
            }
        }
        display
    }

    pub fn is_visible(&self, source: &str) -> bool {
        self.visible.lock().get(source).copied().unwrap_or(false)
    }

    /// Every `set_visible` call in order
    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().clone()
    }

    pub fn hide_calls(&self, source: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(name, visible)| name == source && !visible)
            .count()
    }
}

impl DisplayController for MemoryDisplay {
    fn set_visible<'a>(&'a self, source: &'a str, visible: bool) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(source, visible, "display visibility");
            self.visible.lock().insert(source.to_string(), visible);
            self.calls.lock().push((source.to_string(), visible));
            Ok(())
        })
    }

    fn list_scene_items(&self) -> BoxFuture<'_, Result<Vec<SceneItem>>> {
        Box::pin(async move {
            let visible = self.visible.lock();
            let mut names: Vec<&String> = visible.keys().collect();
            names.sort();
            Ok(names
                .into_iter()
                .enumerate()
                .map(|(i, name)| SceneItem {
                    name: name.clone(),
                    id: i as i64 + 1,
                })
                .collect())
        })
    }
}

/// Failure-tolerant front for a [`DisplayController`]
#[derive(Clone)]
pub struct DisplayHandle {
    controller: Arc<dyn DisplayController>,
    primary_prefix: String,
    focused_prefix: String,
}

impl DisplayHandle {
    pub fn new(
        controller: Arc<dyn DisplayController>,
        primary_prefix: impl Into<String>,
        focused_prefix: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            primary_prefix: primary_prefix.into(),
            focused_prefix: focused_prefix.into(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopDisplay), "active", "focused")
    }

    pub fn primary_source(&self, num: u32) -> String {
        format!("{}{}", self.primary_prefix, num)
    }

    pub fn focused_source(&self, num: u32) -> String {
        format!("{}{}", self.focused_prefix, num)
    }

    /// Returns whether the controller accepted the call
    pub async fn set_visible(&self, source: &str, visible: bool) -> bool {
        match self.controller.set_visible(source, visible).await {
            Ok(()) => true,
            Err(e) => {
                warn!(source, visible, "display update failed: {}", e);
                false
            }
        }
    }

    /// Empty when the controller is unreachable
    pub async fn scene_items(&self) -> Vec<SceneItem> {
        match self.controller.list_scene_items().await {
            Ok(items) => items,
            Err(e) => {
                warn!("listing display items failed: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn show_primary(&self, num: u32) -> bool {
        self.set_visible(&self.primary_source(num), true).await
    }

    pub async fn hide_primary(&self, num: u32) -> bool {
        self.set_visible(&self.primary_source(num), false).await
    }

    pub async fn show_focused(&self, num: u32) -> bool {
        self.set_visible(&self.focused_source(num), true).await
    }

    pub async fn hide_focused(&self, num: u32) -> bool {
        self.set_visible(&self.focused_source(num), false).await
    }

    /// Hide every primary or focused source; returns how many were hidden
    pub async fn hide_all(&self) -> usize {
        let mut hidden = 0;
        for item in self.scene_items().await {
            let ours = item.name.contains(self.primary_prefix.as_str())
                || item.name.contains(self.focused_prefix.as_str());
            if ours && self.set_visible(&item.name, false).await {
                hidden += 1;
            }
        }
        debug!(hidden, "hid all instance sources");
        hidden
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::EngineError;

    struct BrokenDisplay;

    impl DisplayController for BrokenDisplay {
        fn set_visible<'a>(
            &'a self,
            _source: &'a str,
            _visible: bool,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Err(EngineError::Display("socket unavailable".into())) })
        }

        fn list_scene_items(&self) -> BoxFuture<'_, Result<Vec<SceneItem>>> {
            Box::pin(async { Err(EngineError::Display("socket unavailable".into())) })
        }
    }

    #[tokio::test]
    async fn test_show_hide_sources() {
        let memory = Arc::new(MemoryDisplay::new());
        let handle = DisplayHandle::new(memory.clone(), "active", "focused");

        assert!(handle.show_primary(3).await);
        assert!(memory.is_visible("active3"));
        assert!(handle.show_focused(2).await);
        assert!(handle.hide_primary(3).await);
        assert!(!memory.is_visible("active3"));
        assert!(memory.is_visible("focused2"));
        assert_eq!(memory.hide_calls("active3"), 1);
    }

    #[tokio::test]
    async fn test_failures_degrade_to_noop() {
        let handle = DisplayHandle::new(Arc::new(BrokenDisplay), "active", "focused");
        assert!(!handle.show_primary(1).await);
        assert!(handle.scene_items().await.is_empty());
        assert_eq!(handle.hide_all().await, 0);
    }

    #[tokio::test]
    async fn test_hide_all_matches_prefixes() {
        let memory = Arc::new(MemoryDisplay::with_items(["active1", "focused2", "webcam"]));
        let handle = DisplayHandle::new(memory.clone(), "active", "focused");
        handle.show_primary(1).await;

        assert_eq!(handle.hide_all().await, 2);
        assert!(!memory.is_visible("active1"));
        assert_eq!(memory.hide_calls("webcam"), 0);
    }

    #[tokio::test]
    async fn test_noop_display() {
        let handle = DisplayHandle::disabled();
        assert!(handle.show_primary(1).await);
        assert!(handle.scene_items().await.is_empty());
    }
}
