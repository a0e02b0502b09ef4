use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;

use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::health::ready,
		routes::projects::list_projects,
		routes::projects::get_project,
		routes::projects::create_project
	),
	components(
		schemas(
			models::project::Project,
			models::project::ObjectMeta,
			models::project::ProjectSpec,
			models::project::RbacSpec,
			models::project::RuleSpec,
			models::project::ProjectCreateRequest,
			routes::health::HealthResponse,
			routes::health::ReadyResponse
		)
	),
	tags(
		(name = "Health", description = "Liveness and readiness"),
		(name = "Projects", description = "Tenant projects and their access rules")
	)
)]
pub struct ApiDoc;

pub fn build_openapi() -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	ensure_openapi_version(&mut doc);
	add_examples(&mut doc);

	Ok(serde_json::from_value(doc)?)
}

pub fn docs_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = get(move || {
		let doc_json = Arc::clone(&doc_json);
		async move { Json((*doc_json).clone()) }
	});

	Ok(Router::new().route("/api-docs/openapi.json", json_route))
}

fn ensure_security_components(doc: &mut Value) {
	let Some(root) = doc.as_object_mut() else { return; };
	let Some(components) = root
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
	else {
		return;
	};
	let Some(schemes) = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
	else {
		return;
	};

	schemes.insert(
		"bearerAuth".to_string(),
		json!({
			"type": "http",
			"scheme": "bearer",
			"bearerFormat": "JWT"
		}),
	);
}

fn ensure_openapi_version(doc: &mut Value) {
	if let Some(root) = doc.as_object_mut() {
		root.entry("openapi")
			.or_insert_with(|| Value::String("3.0.3".to_string()));
	}
}

fn add_examples(doc: &mut Value) {
	if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
		for item in paths.values_mut() {
			if let Some(operations) = item.as_object_mut() {
				for operation in operations.values_mut() {
					apply_request_examples(operation);
					apply_response_examples(operation);
				}
			}
		}
	}
}

fn apply_request_examples(operation: &mut Value) {
	let Some(request_body) = operation.get_mut("requestBody") else { return; };
	let Some(content) = request_body.get_mut("content").and_then(Value::as_object_mut) else { return; };
	let Some(app_json) = content.get_mut("application/json").and_then(Value::as_object_mut) else { return; };
	let Some(reference) = app_json
		.get("schema")
		.and_then(|schema| schema.get("$ref"))
		.and_then(Value::as_str)
	else {
		return;
	};

	if reference == "#/components/schemas/ProjectCreateRequest" {
		app_json.insert(
			"example".to_string(),
			json!({
				"name": "Launch Site",
				"description": "CDN configuration for the launch site."
			}),
		);
	}
}

fn apply_response_examples(operation: &mut Value) {
	let Some(responses) = operation.get_mut("responses").and_then(Value::as_object_mut) else { return; };

	for response in responses.values_mut() {
		let Some(content) = response.get_mut("content").and_then(Value::as_object_mut) else { continue; };
		let Some(app_json) = content.get_mut("application/json").and_then(Value::as_object_mut) else { continue; };
		let Some(schema) = app_json.get("schema").cloned() else { continue; };

		let single = schema.get("$ref").and_then(Value::as_str);
		let item = schema
			.get("items")
			.and_then(|items| items.get("$ref"))
			.and_then(Value::as_str);

		match (single, item) {
			(Some("#/components/schemas/Project"), _) => {
				app_json.insert("example".to_string(), project_example());
			}
			(_, Some("#/components/schemas/Project")) => {
				app_json.insert("example".to_string(), json!([project_example()]));
			}
			_ => {}
		}
	}
}

fn project_example() -> Value {
	json!({
		"apiVersion": "infrastructure.edgecdnx.com/v1alpha1",
		"kind": "Project",
		"metadata": {
			"name": "launch-site",
			"namespace": "edgecdnx",
			"labels": {
				"edgecdnx.com/project-name": "launch-site",
				"edgecdnx.com/created-by": "ada-at-example-com"
			}
		},
		"spec": {
			"name": "Launch Site",
			"description": "CDN configuration for the launch site.",
			"rbac": {
				"groups": [{"ptype": "g", "v0": "ada@example.com", "v1": "admin", "v2": "launch-site"}],
				"rules": [
					{"ptype": "p", "v0": "admin", "v1": "launch-site", "v2": "*", "v3": "create"},
					{"ptype": "p", "v0": "admin", "v1": "launch-site", "v2": "*", "v3": "read"},
					{"ptype": "p", "v0": "admin", "v1": "launch-site", "v2": "*", "v3": "update"},
					{"ptype": "p", "v0": "admin", "v1": "launch-site", "v2": "*", "v3": "delete"}
				]
			}
		}
	})
}
