//! # Graph Events
//!
//! Notifications emitted after a successful edge mutation. Delivery is
//! fire-and-forget: a sink failure is logged and never undoes the write.

use crate::{FormulaId, SubstanceId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// A committed change to the composition graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GraphEvent {
    IngredientAdded {
        user: UserId,
        parent: FormulaId,
        ingredient: FormulaId,
        concentration: f64,
    },
    IngredientUpdated {
        user: UserId,
        parent: FormulaId,
        ingredient: FormulaId,
    },
    IngredientRemoved {
        user: UserId,
        parent: FormulaId,
        ingredient: FormulaId,
    },
    SubstanceAdded {
        user: UserId,
        formula: FormulaId,
        substance: SubstanceId,
        concentration: f64,
    },
    SubstanceUpdated {
        user: UserId,
        formula: FormulaId,
        substance: SubstanceId,
    },
    SubstanceRemoved {
        user: UserId,
        formula: FormulaId,
        substance: SubstanceId,
    },
}

impl GraphEvent {
    /// Short machine name, e.g. `"ingredient_added"`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::IngredientAdded { .. } => "ingredient_added",
            Self::IngredientUpdated { .. } => "ingredient_updated",
            Self::IngredientRemoved { .. } => "ingredient_removed",
            Self::SubstanceAdded { .. } => "substance_added",
            Self::SubstanceUpdated { .. } => "substance_updated",
            Self::SubstanceRemoved { .. } => "substance_removed",
        }
    }
}

/// Delivery failure reported by a sink.
#[derive(Debug, Error)]
#[error("event sink failed: {0}")]
pub struct SinkError(pub String);

/// Receiver for [`GraphEvent`]s (analytics, notifications, audit trails).
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &GraphEvent) -> Result<(), SinkError>;
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: &GraphEvent) -> Result<(), SinkError> {
        (**self).emit(event)
    }
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn emit(&self, event: &GraphEvent) -> Result<(), SinkError> {
        (**self).emit(event)
    }
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &GraphEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes each event to the `blendgraph_core::events` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &GraphEvent) -> Result<(), SinkError> {
        tracing::info!(
            target: "blendgraph_core::events",
            event = event.name(),
            ?event,
            "graph event"
        );
        Ok(())
    }
}

/// Keeps events in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GraphEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<GraphEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<GraphEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &GraphEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .map_err(|e| SinkError(e.to_string()))?
            .push(event.clone());
        Ok(())
    }
}
