//! Closed tagged-variant model for everything that crosses the engine
//! boundary: inbound host signals, outbound collaborator commands, and the
//! wire input the engine loop reads.

use serde::{Deserialize, Serialize};

use crate::tree::{NodeId, TabId, ViewId, WindowId};

/// Normalized host tab-lifecycle signals, one stream per host tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TabEvent {
    Created {
        tab: TabId,
        #[serde(default)]
        opener: Option<TabId>,
        url: String,
        window: WindowId,
        #[serde(default)]
        user_initiated: bool,
    },
    Removed {
        tab: TabId,
    },
    Updated {
        tab: TabId,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        status: Option<String>,
    },
    Moved {
        tab: TabId,
        new_index: usize,
    },
    Activated {
        tab: TabId,
        window: WindowId,
    },
}

/// Structural commands accepted from collaborators (UI, menus).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EngineCommand {
    Group {
        nodes: Vec<NodeId>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        color: Option<String>,
    },
    AddToGroup {
        node: NodeId,
        group: NodeId,
    },
    Reparent {
        node: NodeId,
        #[serde(default)]
        new_parent: Option<NodeId>,
        index: usize,
    },
    ToggleExpand {
        node: NodeId,
    },
    Move {
        node: NodeId,
        index: usize,
    },
    CreateView {
        window: WindowId,
        name: String,
    },
    SwitchView {
        window: WindowId,
        view: ViewId,
    },
    DeleteView {
        view: ViewId,
    },
}

/// One currently-open host tab, as reported by a fresh enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveTab {
    pub tab: TabId,
    pub window: WindowId,
    #[serde(default)]
    pub opener: Option<TabId>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Wire form read by the engine loop, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Input {
    Event {
        #[serde(flatten)]
        event: TabEvent,
    },
    Command {
        #[serde(flatten)]
        command: EngineCommand,
    },
    /// Fresh enumeration of open tabs, used for startup reconciliation.
    Enumerate {
        tabs: Vec<LiveTab>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_event_round_trips_with_tag() {
        let ev = TabEvent::Created {
            tab: 7,
            opener: Some(3),
            url: "https://example.com".to_string(),
            window: 1,
            user_initiated: false,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"event\":\"created\""));
        assert_eq!(serde_json::from_str::<TabEvent>(&json).unwrap(), ev);
    }

    #[test]
    fn wire_input_flattens_inner_tags() {
        let line = r#"{"type":"event","event":"removed","tab":9}"#;
        let input: Input = serde_json::from_str(line).unwrap();
        assert_eq!(input, Input::Event { event: TabEvent::Removed { tab: 9 } });

        let line = r#"{"type":"command","op":"toggle_expand","node":4}"#;
        let input: Input = serde_json::from_str(line).unwrap();
        assert_eq!(input, Input::Command { command: EngineCommand::ToggleExpand { node: 4 } });
    }

    #[test]
    fn optional_event_fields_default() {
        let line = r#"{"event":"created","tab":1,"url":"about:blank","window":2}"#;
        let ev: TabEvent = serde_json::from_str(line).unwrap();
        match ev {
            TabEvent::Created { opener, user_initiated, .. } => {
                assert_eq!(opener, None);
                assert!(!user_initiated);
            }
            _ => panic!("wrong variant"),
        }
    }
}
