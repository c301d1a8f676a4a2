mod common;

use common::{runtime, settle, Dom, Manual};
use ns_update::{
	model::ModelStatus,
	params,
	update::{Config, Runtime},
	view::ViewState,
	Error, Layout, LayoutView, ModelDefinition, Params, Registry, ViewDefinition, ViewEvent,
};
use serde_json::{json, Value};
use std::{cell::RefCell, rc::Rc};

fn echo(request: &ns_update::transport::ModelRequest) -> Value {
	json!({ "data": request.key })
}

fn profile_page() -> Registry {
	let registry = Registry::new();
	registry.define_model(ModelDefinition::new("user").param("login")).unwrap();
	registry.define_model(ModelDefinition::new("posts").param("login").param_default("page", 1)).unwrap();
	registry.define_view(ViewDefinition::new("app")).unwrap();
	registry.define_view(ViewDefinition::new("profile").model("user")).unwrap();
	registry.define_view(ViewDefinition::new("feed").model("posts")).unwrap();
	registry
}

fn profile_layout() -> Layout {
	Layout::new("app").child(LayoutView::new("profile")).child(LayoutView::new("feed"))
}

#[test]
fn first_update_fetches_once_and_renders_in_order() {
	let registry = profile_page();
	let (runtime, transport, dom) = runtime(&registry);
	let params = params! { "login" => "a" };
	let app = runtime.create_view("app", params.clone()).unwrap();

	let completion = runtime.update(&app, &profile_layout(), params).start().unwrap();
	assert_eq!(transport.pending(), vec![vec!["model=user&login=a".to_owned(), "model=posts&login=a&page=1".to_owned()]]);

	runtime.scheduler().run_until_idle();
	assert!(completion.sync.is_pending());
	assert!(dom.attached().is_empty());

	assert!(transport.respond(echo));
	runtime.scheduler().run_until_idle();
	assert_eq!(completion.sync.outcome(), Some(Ok(())));
	assert!(completion.branches.is_empty());

	let app_node = runtime.node(&app).unwrap();
	assert_eq!(dom.parent(app_node), None);
	assert_eq!(dom.children(app_node), vec!["view=feed&login=a", "view=profile&login=a"]);

	let profile = app.find("view=profile&login=a").unwrap();
	assert_eq!(profile.state(), ViewState::Ok);
	assert!(profile.is_visible());
	assert_eq!(profile.model_data("user"), Some(json!("model=user&login=a")));
	assert_eq!(transport.issued().len(), 1);
}

#[test]
fn unchanged_update_neither_fetches_nor_renders() {
	let registry = profile_page();
	let (runtime, transport, dom) = runtime(&registry);
	let params = params! { "login" => "a" };
	let app = runtime.create_view("app", params.clone()).unwrap();

	runtime.update(&app, &profile_layout(), params.clone()).start().unwrap();
	settle(&runtime, &transport, echo);
	let profile = app.find("view=profile&login=a").unwrap();
	let node = runtime.node(&profile).unwrap();

	let completion = runtime.update(&app, &profile_layout(), params).start().unwrap();
	runtime.scheduler().run_until_idle();
	assert_eq!(completion.sync.outcome(), Some(Ok(())));
	assert_eq!(transport.issued().len(), 1);
	assert_eq!(dom.renders("view=app"), 1);
	assert_eq!(dom.renders("view=profile&login=a"), 1);
	assert_eq!(app.find("view=profile&login=a"), Some(profile.clone()));
	assert_eq!(runtime.node(&profile), Some(node));
}

#[test]
fn forced_updates_render_everything() {
	let registry = profile_page();
	let (runtime, transport, dom) = runtime(&registry);
	let params = params! { "login" => "a" };
	let app = runtime.create_view("app", params.clone()).unwrap();

	runtime.update(&app, &profile_layout(), params.clone()).start().unwrap();
	settle(&runtime, &transport, echo);

	runtime.update(&app, &profile_layout(), params).forced(true).start().unwrap();
	settle(&runtime, &transport, echo);
	assert_eq!(transport.issued().len(), 1);
	assert_eq!(dom.renders("view=app"), 2);
	assert_eq!(dom.renders("view=feed&login=a"), 2);
	assert_eq!(dom.count("view=feed&login=a"), 1);
}

#[test]
fn changed_keys_replace_instances() {
	let registry = Registry::new();
	registry.define_model(ModelDefinition::new("photo").param("id")).unwrap();
	registry.define_view(ViewDefinition::new("app")).unwrap();
	let destroyed = Rc::new(RefCell::new(Vec::new()));
	let log = destroyed.clone();
	registry
		.define_view(ViewDefinition::new("photo").model("photo").on_fn(ViewEvent::Destroy, move |view| log.borrow_mut().push(view.key().to_owned())))
		.unwrap();
	let (runtime, transport, dom) = runtime(&registry);
	let layout = Layout::new("app").child(LayoutView::new("photo"));
	let app = runtime.create_view("app", params! {}).unwrap();

	runtime.update(&app, &layout, params! { "id" => 1 }).start().unwrap();
	settle(&runtime, &transport, echo);
	let first = app.find("view=photo&id=1").unwrap();
	assert_eq!(runtime.store().references("model=photo&id=1"), 1);

	runtime.update(&app, &layout, params! { "id" => 2 }).start().unwrap();
	settle(&runtime, &transport, echo);

	assert!(first.is_destroyed());
	assert_eq!(*destroyed.borrow(), vec!["view=photo&id=1".to_owned()]);
	assert_eq!(dom.count("view=photo&id=1"), 0);
	assert_eq!(dom.count("view=photo&id=2"), 1);
	assert_eq!(app.find("view=photo&id=1"), None);

	assert_eq!(runtime.store().references("model=photo&id=1"), 0);
	assert_eq!(runtime.store().sweep(), 1);
	assert!(runtime.store().lookup("model=photo&id=1").is_none());
	assert!(runtime.store().lookup("model=photo&id=2").is_some());
}

#[test]
fn model_destruction_leaves_one_node() {
	let registry = Registry::new();
	registry.define_model(ModelDefinition::new("mSimple")).unwrap();
	registry.define_view(ViewDefinition::new("app")).unwrap();
	registry.define_view(ViewDefinition::new("vSimple").model("mSimple")).unwrap();
	let (runtime, transport, dom) = runtime(&registry);
	let store = runtime.store().clone();
	store.get("mSimple", &params! {}).unwrap().set_data(json!({ "foo": "bar" }));

	let layout = Layout::from_value(&json!({ "app": { "vSimple": {} } })).unwrap();
	let app = runtime.create_view("app", params! {}).unwrap();
	runtime.update(&app, &layout, params! {}).start().unwrap();
	settle(&runtime, &transport, echo);

	assert!(store.destroy(&store.get("mSimple", &params! {}).unwrap()));
	store.get("mSimple", &params! {}).unwrap().set_data(json!({ "foo": "bar2" }));

	let completion = runtime.update(&app, &layout, params! {}).start().unwrap();
	settle(&runtime, &transport, echo);
	assert_eq!(completion.sync.outcome(), Some(Ok(())));

	assert!(transport.issued().is_empty());
	assert_eq!(dom.count("view=vSimple"), 1);
	assert_eq!(dom.renders("view=vSimple"), 2);
	let node = runtime.node(&app.find("view=vSimple").unwrap()).unwrap();
	assert_eq!(dom.element(node).unwrap().content, json!({ "mSimple": { "data": { "foo": "bar2" } } }));
}

#[test]
fn render_errors_stay_in_their_subtree() {
	let registry = Registry::new();
	for name in ["app", "good", "bad", "below-bad"] {
		registry.define_view(ViewDefinition::new(name)).unwrap();
	}
	let (runtime, transport, dom) = runtime(&registry);
	let layout = Layout::new("app").child(LayoutView::new("bad").child(LayoutView::new("below-bad"))).child(LayoutView::new("good"));
	let app = runtime.create_view("app", params! {}).unwrap();

	dom.refuse("bad");
	let completion = runtime.update(&app, &layout, params! {}).start().unwrap();
	settle(&runtime, &transport, echo);
	assert!(matches!(completion.sync.outcome(), Some(Err(Error::Render { ref key, .. })) if key == "view=bad"));
	assert_eq!(dom.attached(), vec!["view=app", "view=good"]);

	dom.accept("bad");
	let completion = runtime.update(&app, &layout, params! {}).start().unwrap();
	settle(&runtime, &transport, echo);
	assert_eq!(completion.sync.outcome(), Some(Ok(())));
	assert_eq!(dom.attached(), vec!["view=app", "view=bad", "view=below-bad", "view=good"]);
	assert_eq!(dom.renders("view=good"), 1);
}

#[test]
fn planning_errors_change_nothing() {
	let registry = Registry::new();
	for name in ["app", "a", "b"] {
		registry.define_view(ViewDefinition::new(name)).unwrap();
	}
	let (runtime, _, _) = runtime(&registry);
	let app = runtime.create_view("app", params! {}).unwrap();

	let wrong_root = Layout::new("a").child(LayoutView::new("b"));
	assert!(matches!(runtime.update(&app, &wrong_root, params! {}).start(), Err(Error::Layout { .. })));

	let duplicate = Layout::new("app").child(LayoutView::new("a")).child(LayoutView::new("a"));
	assert!(matches!(runtime.update(&app, &duplicate, params! {}).start(), Err(Error::Layout { .. })));

	let unknown = Layout::new("app").child(LayoutView::new("a")).child(LayoutView::new("ghost"));
	assert!(matches!(runtime.update(&app, &unknown, params! {}).start(), Err(Error::Undefined { .. })));

	assert!(app.children().is_empty());
	assert!(runtime.scheduler().is_idle());
}

#[test]
fn depth_limit_is_enforced() {
	let registry = Registry::new();
	for name in ["app", "a", "b"] {
		registry.define_view(ViewDefinition::new(name)).unwrap();
	}
	let runtime = Runtime::new(Config { depth_limit: 1 }, registry, Manual::default(), Dom::default());
	let app = runtime.create_view("app", params! {}).unwrap();

	let shallow = Layout::new("app").child(LayoutView::new("a"));
	let deep = Layout::new("app").child(LayoutView::new("a").child(LayoutView::new("b")));
	assert_eq!(runtime.update(&app, &deep, params! {}).start().map(|_| ()), Err(Error::DepthLimit { key: "view=a".to_owned() }));
	assert!(app.children().is_empty());
	assert!(runtime.update(&app, &shallow, params! {}).start().is_ok());
}

#[test]
fn concurrent_updates_share_requests() {
	let registry = profile_page();
	let (runtime, transport, dom) = runtime(&registry);
	let params = params! { "login" => "a" };
	let layout = Layout::new("app").child(LayoutView::new("profile"));
	let first = runtime.create_view("app", params.clone()).unwrap();
	let second = runtime.create_view("app", params.clone()).unwrap();

	let a = runtime.update(&first, &layout, params.clone()).start().unwrap();
	let b = runtime.update(&second, &layout, params).start().unwrap();
	assert_eq!(transport.issued().len(), 1);

	settle(&runtime, &transport, echo);
	assert_eq!(a.sync.outcome(), Some(Ok(())));
	assert_eq!(b.sync.outcome(), Some(Ok(())));
	assert_eq!(transport.issued().len(), 1);
	assert_eq!(dom.count("view=profile&login=a"), 2);
}

#[test]
fn failed_fetches_put_models_into_error() {
	let registry = profile_page();
	let (runtime, transport, dom) = runtime(&registry);
	let params = params! { "login" => "a" };
	let layout = Layout::new("app").child(LayoutView::new("profile"));
	let app = runtime.create_view("app", params.clone()).unwrap();

	let completion = runtime.update(&app, &layout, params.clone()).start().unwrap();
	assert!(transport.fail("offline"));
	runtime.scheduler().run_until_idle();
	assert_eq!(completion.sync.outcome(), Some(Ok(())));

	let profile = app.find("view=profile&login=a").unwrap();
	let user = profile.model("user").unwrap();
	assert_eq!(user.status(), ModelStatus::Error);
	assert!(user.error().unwrap().as_str().unwrap().contains("offline"));
	assert_eq!(profile.state(), ViewState::Error);
	assert_eq!(dom.count("view=profile&login=a"), 1);

	// ERROR is refetched, and per-model errors come from the response.
	runtime.update(&app, &layout, params).start().unwrap();
	assert_eq!(transport.pending(), vec![vec!["model=user&login=a".to_owned()]]);
	transport.respond(|_| json!({ "error": "no such user" }));
	runtime.scheduler().run_until_idle();
	assert_eq!(user.error(), Some(json!("no such user")));
	assert_eq!(dom.renders("view=profile&login=a"), 2);
}

#[test]
fn computed_bindings_choose_or_clear_a_slot() {
	let registry = Registry::new();
	for name in ["app", "photo", "album"] {
		registry.define_view(ViewDefinition::new(name)).unwrap();
	}
	let (runtime, transport, dom) = runtime(&registry);
	let layout = Layout::new("app").child(LayoutView::computed("content", |params: &Params| params.get("page").and_then(Value::as_str).map(str::to_owned)));
	let app = runtime.create_view("app", params! {}).unwrap();

	runtime.update(&app, &layout, params! { "page" => "photo" }).start().unwrap();
	settle(&runtime, &transport, echo);
	assert_eq!(dom.attached(), vec!["view=app", "view=photo"]);

	runtime.update(&app, &layout, params! { "page" => "album" }).start().unwrap();
	settle(&runtime, &transport, echo);
	assert_eq!(dom.attached(), vec!["view=album", "view=app"]);

	runtime.update(&app, &layout, params! {}).start().unwrap();
	settle(&runtime, &transport, echo);
	assert_eq!(dom.attached(), vec!["view=app"]);
	assert!(app.children().is_empty());
}

#[test]
fn repaints_and_shows_are_reported() {
	let registry = profile_page();
	let events = Rc::new(RefCell::new(Vec::new()));
	let (show, repaint) = (events.clone(), events.clone());
	registry
		.define_view(
			ViewDefinition::new("watched")
				.model("user")
				.on_fn(ViewEvent::Show, move |_| show.borrow_mut().push("show"))
				.on_fn(ViewEvent::Repaint, move |_| repaint.borrow_mut().push("repaint")),
		)
		.unwrap();
	let (runtime, transport, _) = runtime(&registry);
	let params = params! { "login" => "a" };
	let layout = Layout::new("app").child(LayoutView::new("watched"));
	let app = runtime.create_view("app", params.clone()).unwrap();

	runtime.update(&app, &layout, params.clone()).start().unwrap();
	settle(&runtime, &transport, echo);
	assert_eq!(*events.borrow(), vec!["repaint", "show"]);

	app.find("view=watched&login=a").unwrap().model("user").unwrap().invalidate();
	runtime.update(&app, &layout, params).start().unwrap();
	settle(&runtime, &transport, echo);
	assert_eq!(*events.borrow(), vec!["repaint", "show", "repaint"]);
	assert_eq!(transport.issued().len(), 2);
}

#[test]
fn destroying_a_tree_detaches_everything() {
	let registry = profile_page();
	let (runtime, transport, dom) = runtime(&registry);
	let params = params! { "login" => "a" };
	let app = runtime.create_view("app", params.clone()).unwrap();
	runtime.update(&app, &profile_layout(), params.clone()).start().unwrap();
	settle(&runtime, &transport, echo);
	let profile = app.find("view=profile&login=a").unwrap();

	runtime.destroy(&app);
	assert!(dom.attached().is_empty());
	assert!(app.is_destroyed());
	assert!(profile.is_destroyed());
	assert!(!profile.model("user").unwrap().is_subscribed(profile.id()));
	assert!(matches!(runtime.update(&app, &profile_layout(), params).start(), Err(Error::Layout { .. })));
}

#[test]
fn validity_is_checked_again_right_before_rendering() {
	let registry = profile_page();
	let (runtime, transport, dom) = runtime(&registry);
	let params = params! { "login" => "a" };
	let app = runtime.create_view("app", params.clone()).unwrap();
	let user = runtime.store().get("user", &params).unwrap();

	let completion = runtime.update(&app, &profile_layout(), params).start().unwrap();
	assert!(transport.respond(echo));
	// Apply the batch, but stop before the region renders.
	while user.status() != ModelStatus::Ok {
		assert!(runtime.scheduler().run_once());
	}
	assert!(dom.attached().is_empty());

	user.set_error(json!("gone"));
	runtime.scheduler().run_until_idle();
	assert_eq!(completion.sync.outcome(), Some(Ok(())));
	let profile = app.find("view=profile&login=a").unwrap();
	assert_eq!(profile.state(), ViewState::Error);
	assert_eq!(dom.renders("view=profile&login=a"), 1);
	assert_eq!(transport.issued().len(), 1);
}

#[test]
fn superseded_updates_render_nothing() {
	let registry = Registry::new();
	registry.define_model(ModelDefinition::new("photo").param("id")).unwrap();
	registry.define_view(ViewDefinition::new("app")).unwrap();
	registry.define_view(ViewDefinition::new("photo").model("photo")).unwrap();
	let (runtime, transport, dom) = runtime(&registry);
	let layout = Layout::new("app").child(LayoutView::new("photo"));
	let app = runtime.create_view("app", params! {}).unwrap();

	let first = runtime.update(&app, &layout, params! { "id" => 1 }).start().unwrap();
	let photo1 = app.find("view=photo&id=1").unwrap();
	let second = runtime.update(&app, &layout, params! { "id" => 2 }).start().unwrap();
	assert_eq!(transport.pending(), vec![vec!["model=photo&id=1".to_owned()], vec!["model=photo&id=2".to_owned()]]);

	assert!(transport.respond(echo));
	runtime.scheduler().run_until_idle();
	assert_eq!(first.sync.outcome(), Some(Ok(())));
	assert!(second.sync.is_pending());
	assert!(dom.attached().is_empty());
	assert_eq!(dom.renders("view=photo&id=1"), 0);

	assert!(transport.respond(echo));
	runtime.scheduler().run_until_idle();
	assert_eq!(second.sync.outcome(), Some(Ok(())));
	assert_eq!(dom.attached(), vec!["view=app", "view=photo&id=2"]);
	assert_eq!(dom.renders("view=photo&id=1"), 0);
	assert!(photo1.is_destroyed());
}
