//! Common test utilities for integration tests.

#![allow(dead_code)]

pub mod harness;

use diagram_engine::{ActionEvent, ActionKind};
use std::cell::RefCell;
use std::rc::Rc;

/// Records gesture notifications emitted by the controller.
#[derive(Default, Clone)]
pub struct EventTracker {
    pub events: Rc<RefCell<Vec<ActionEvent>>>,
}

impl EventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) -> impl FnMut(&ActionEvent) + 'static {
        let events = self.events.clone();
        move |e| events.borrow_mut().push(*e)
    }

    pub fn all(&self) -> Vec<ActionEvent> {
        self.events.borrow().clone()
    }

    pub fn started(&self) -> Vec<ActionKind> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                ActionEvent::Started(kind) => Some(*kind),
                _ => None,
            })
            .collect()
    }

    pub fn stopped(&self) -> Vec<ActionKind> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                ActionEvent::Stopped(kind) => Some(*kind),
                _ => None,
            })
            .collect()
    }

    pub fn firing_count(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, ActionEvent::StillFiring(_)))
            .count()
    }

    /// Clear all recorded events.
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

/// Float comparison with a small tolerance.
pub fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-3
}
