//! ChatKit widget component tree and the approval-request card.

use serde::{Deserialize, Serialize};

use super::chatkit::{Action, ApprovalDecision, APPROVAL_ACTION_TYPE};
use super::workflow::ToolArguments;
use crate::error::HandoffError;

const APPROVAL_TITLE: &str = "Approval Required";
const APPROVAL_DESCRIPTION: &str = "This action requires your approval before proceeding.";

/// A node of a widget document, tagged by its component name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WidgetComponent {
    Card {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        padding: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<String>,
        #[serde(default)]
        children: Vec<WidgetComponent>,
    },
    Col {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        align: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gap: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        padding: Option<u32>,
        #[serde(default)]
        children: Vec<WidgetComponent>,
    },
    Row {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gap: Option<u32>,
        #[serde(default)]
        children: Vec<WidgetComponent>,
    },
    Box {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        background: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        radius: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        padding: Option<u32>,
        #[serde(default)]
        children: Vec<WidgetComponent>,
    },
    Icon {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    Title {
        value: String,
    },
    Text {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    Markdown {
        value: String,
    },
    Divider {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        spacing: Option<u32>,
    },
    Button {
        label: String,
        #[serde(default)]
        block: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant: Option<String>,
        #[serde(
            rename = "onClickAction",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        on_click_action: Option<Action>,
    },
}

impl WidgetComponent {
    fn markdown(value: impl Into<String>) -> Self {
        WidgetComponent::Markdown {
            value: value.into(),
        }
    }

    fn approval_button(label: &str, variant: Option<&str>, payload: serde_json::Value) -> Self {
        WidgetComponent::Button {
            label: label.to_string(),
            block: true,
            variant: variant.map(str::to_string),
            on_click_action: Some(Action {
                action_type: APPROVAL_ACTION_TYPE.to_string(),
                payload,
            }),
        }
    }

    /// Depth-first walk over this node and all descendants.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a WidgetComponent)) {
        f(self);
        match self {
            WidgetComponent::Card { children, .. }
            | WidgetComponent::Col { children, .. }
            | WidgetComponent::Row { children, .. }
            | WidgetComponent::Box { children, .. } => {
                for child in children {
                    child.visit(f);
                }
            }
            _ => {}
        }
    }
}

/// Render tool arguments as a fenced JSON code block.
fn arguments_code_block(tool_args: Option<&ToolArguments>) -> Result<String, HandoffError> {
    let rendered = match tool_args {
        Some(args) => serde_json::to_string_pretty(args).map_err(|err| {
            HandoffError::Translation(format!("failed to render tool arguments: {err}"))
        })?,
        None => "null".to_string(),
    };
    Ok(format!("```json\n{rendered}\n```"))
}

fn decision_payload(
    tool_name: &str,
    tool_args: Option<&ToolArguments>,
    approved: bool,
    call_id: &str,
    request_id: &str,
) -> Result<serde_json::Value, HandoffError> {
    let decision = ApprovalDecision {
        tool_name: tool_name.to_string(),
        tool_args: tool_args.cloned(),
        approved,
        call_id: call_id.to_string(),
        request_id: request_id.to_string(),
    };
    serde_json::to_value(decision).map_err(|err| {
        HandoffError::Translation(format!("failed to encode approval payload: {err}"))
    })
}

/// Build the card asking the user to approve or reject a pending tool call.
///
/// Both buttons carry the full decision payload; only `approved` differs, so
/// the approval handler needs no extra state to resume the turn.
///
/// # Errors
///
/// Returns [`HandoffError::Translation`] when the arguments cannot be encoded.
pub fn build_approval_request(
    tool_name: &str,
    tool_args: Option<&ToolArguments>,
    call_id: &str,
    request_id: &str,
) -> Result<WidgetComponent, HandoffError> {
    let code_block = arguments_code_block(tool_args)?;
    let approve = decision_payload(tool_name, tool_args, true, call_id, request_id)?;
    let reject = decision_payload(tool_name, tool_args, false, call_id, request_id)?;

    Ok(WidgetComponent::Card {
        key: Some("approval_request".to_string()),
        padding: Some(0),
        size: Some("md".to_string()),
        children: vec![
            WidgetComponent::Col {
                align: Some("center".to_string()),
                gap: Some(4),
                padding: Some(4),
                children: vec![
                    WidgetComponent::Box {
                        background: Some("yellow-400".to_string()),
                        radius: Some("full".to_string()),
                        padding: Some(3),
                        children: vec![WidgetComponent::Icon {
                            name: "info".to_string(),
                            size: Some("3xl".to_string()),
                            color: Some("white".to_string()),
                        }],
                    },
                    WidgetComponent::Col {
                        align: Some("center".to_string()),
                        gap: Some(1),
                        padding: None,
                        children: vec![
                            WidgetComponent::Title {
                                value: APPROVAL_TITLE.to_string(),
                            },
                            WidgetComponent::Text {
                                value: APPROVAL_DESCRIPTION.to_string(),
                                color: Some("secondary".to_string()),
                            },
                            WidgetComponent::markdown(format!("**{tool_name}**")),
                        ],
                    },
                ],
            },
            WidgetComponent::markdown(code_block),
            WidgetComponent::Divider { spacing: Some(2) },
            WidgetComponent::Row {
                gap: None,
                children: vec![
                    WidgetComponent::approval_button("Approve", None, approve),
                    WidgetComponent::approval_button("No", Some("outline"), reject),
                ],
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn buttons(widget: &WidgetComponent) -> Vec<(&str, &Action)> {
        let mut out = Vec::new();
        widget.visit(&mut |node| {
            if let WidgetComponent::Button {
                label,
                on_click_action: Some(action),
                ..
            } = node
            {
                out.push((label.as_str(), action));
            }
        });
        out
    }

    fn markdown_values(widget: &WidgetComponent) -> Vec<&str> {
        let mut out = Vec::new();
        widget.visit(&mut |node| {
            if let WidgetComponent::Markdown { value } = node {
                out.push(value.as_str());
            }
        });
        out
    }

    #[test]
    fn test_buttons_differ_only_in_approved_flag() {
        let mut args = ToolArguments::new();
        args.insert("amount".into(), json!(120.5));
        let widget = build_approval_request("T", Some(&args), "c2", "r1").expect("widget");

        let found = buttons(&widget);
        assert_eq!(found.len(), 2);
        let (approve_label, approve) = found[0];
        let (reject_label, reject) = found[1];
        assert_eq!(approve_label, "Approve");
        assert_eq!(reject_label, "No");
        assert_eq!(approve.action_type, "approval");
        assert_eq!(approve.payload["approved"], true);
        assert_eq!(reject.payload["approved"], false);

        let mut approve_rest = approve.payload.clone();
        let mut reject_rest = reject.payload.clone();
        approve_rest["approved"] = json!(null);
        reject_rest["approved"] = json!(null);
        assert_eq!(approve_rest, reject_rest);
        assert_eq!(approve.payload["call_id"], "c2");
        assert_eq!(approve.payload["request_id"], "r1");
        assert_eq!(approve.payload["tool_args"]["amount"], 120.5);
    }

    #[test]
    fn test_card_shows_tool_name_and_arguments() {
        let mut args = ToolArguments::new();
        args.insert("userName".into(), json!("bob.user@contoso.com"));
        let widget =
            build_approval_request("processPayment", Some(&args), "c1", "r9").expect("widget");
        let markdown = markdown_values(&widget);
        assert_eq!(markdown[0], "**processPayment**");
        assert!(markdown[1].starts_with("```json\n"));
        assert!(markdown[1].contains("\"userName\": \"bob.user@contoso.com\""));
    }

    #[test]
    fn test_absent_arguments_render_null() {
        let widget = build_approval_request("getCreditCards", None, "c1", "r1").expect("widget");
        assert_eq!(markdown_values(&widget)[1], "```json\nnull\n```");
        let found = buttons(&widget);
        assert_eq!(found[0].1.payload["tool_args"], json!(null));
    }

    #[test]
    fn test_wire_shape_of_card_root() {
        let widget = build_approval_request("T", None, "c", "r").expect("widget");
        let value = serde_json::to_value(&widget).expect("serialize");
        assert_eq!(value["type"], "Card");
        assert_eq!(value["key"], "approval_request");
        assert_eq!(value["size"], "md");
        assert_eq!(value["children"][2], json!({ "type": "Divider", "spacing": 2 }));
        let button = &value["children"][3]["children"][1];
        assert_eq!(button["variant"], "outline");
        assert_eq!(button["onClickAction"]["type"], "approval");
        let back: WidgetComponent = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, widget);
    }
}
