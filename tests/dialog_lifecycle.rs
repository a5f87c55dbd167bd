//! End-to-end dialog lifecycle through the public API

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use modalstack::dialog::{
    ControllerSpec, ControllerStatus, DialogEvent, DialogManager, DialogOptions, DialogState,
    InjectedArgs, Locals, TemplateFetcher, TemplateSpec,
};
use modalstack::DialogDefaults;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct StaticTemplates {
    bodies: HashMap<String, String>,
}

impl StaticTemplates {
    fn with(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_string(), body.to_string());
        self
    }
}

#[async_trait]
impl TemplateFetcher for StaticTemplates {
    async fn get(&self, url: &str) -> Result<String> {
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 Not Found: {}", url))
    }
}

fn wizard_manager() -> DialogManager {
    let templates = StaticTemplates::default()
        .with("step1.html", "<div><p>Step {{ step }} of {{ total }}</p></div>")
        .with("step2.html", "<div><p>Step {{ step + 1 }} of {{ total }}</p></div>");
    DialogManager::builder()
        .fetcher(Arc::new(templates))
        .build()
}

#[tokio::test]
async fn test_wizard_dialog_lifecycle() {
    let manager = wizard_manager();
    let mut events = manager.subscribe();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let controller = move |args: InjectedArgs| -> Result<()> {
        let context = args
            .by_name("reactiveContext")
            .and_then(|arg| arg.as_context())
            .ok_or_else(|| anyhow!("no context"))?;
        let total = args.by_name("total").and_then(|arg| arg.as_local()).cloned();
        context.set("step", json!(1));
        context.set("total", total.unwrap_or(json!(0)));
        sink.lock().unwrap().push(context.dialog_id().clone());
        Ok(())
    };

    let handle = manager
        .open(
            DialogOptions::new()
                .with_name("wizard")
                .with_pane("step1", TemplateSpec::url("step1.html"))
                .with_pane("step2", TemplateSpec::url("step2.html"))
                .with_controller(ControllerSpec::handle(controller).inject(["reactiveContext", "total"]))
                .with_locals(Locals::new().with_async("total", || async { Ok(json!(2)) })),
        )
        .await
        .unwrap();

    assert_eq!(handle.name(), Some("wizard"));
    assert_eq!(handle.active_pane().as_deref(), Some("step1"));
    assert_eq!(handle.controller_settled().await, ControllerStatus::Instantiated);
    assert_eq!(seen.lock().unwrap().as_slice(), [handle.id().clone()]);

    // Panes are compiled against the context the controller filled in
    handle.load_pane(Some("step2")).await.unwrap();
    assert_eq!(handle.element().text_content(), "Step 2 of 2");

    assert!(handle.close(Some(json!("done"))));
    assert_eq!(handle.state(), DialogState::Closing);
    assert!(manager.notify_transition_end(handle.id()));

    let outcome = handle.closed().await;
    assert_eq!(outcome.value, Some(json!("done")));
    assert!(!outcome.confirmed);
    assert!(manager.open_dialogs().is_empty());

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(match event {
            DialogEvent::Opened(_) => "opened",
            DialogEvent::ControllerInstantiated(_) => "controller",
            DialogEvent::PaneLoaded { .. } => "pane",
            DialogEvent::Closing(_) => "closing",
            DialogEvent::Closed(_) => "closed",
        });
    }
    assert_eq!(kinds, ["opened", "controller", "pane", "closing", "closed"]);
}

#[tokio::test]
async fn test_configured_defaults_shape_dialogs() {
    let defaults = DialogDefaults {
        id_prefix: "modal".to_string(),
        empty_template: "Nothing here".to_string(),
        closing_class: "fade-out".to_string(),
        ..DialogDefaults::default()
    };
    let manager = DialogManager::new(defaults);

    let first = manager.open(DialogOptions::new()).await.unwrap();
    let second = manager.open(DialogOptions::new().disable_animation(true)).await.unwrap();
    assert_eq!(first.id().as_str(), "modal1");
    assert_eq!(second.id().as_str(), "modal2");
    assert_eq!(first.element().text_content(), "Nothing here");

    manager.close_all();
    assert!(first.element().has_class("fade-out"));
    // Animation disabled: gone without a teardown signal
    assert_eq!(second.state(), DialogState::Destroyed);
    assert_eq!(manager.open_dialogs(), vec![first.id().clone()]);

    manager.notify_transition_end(first.id());
    first.closed().await;
    assert_eq!(manager.dialog_count(), 0);
}
