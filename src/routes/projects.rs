use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;

use crate::app::AppState;
use crate::authz::{actions, resources, roles, Principal};
use crate::errors::{AppError, AppResult};
use crate::models::project::{
    ObjectMeta, Project, ProjectCreateRequest, ProjectSpec, RbacSpec, RuleSpec, CREATED_BY_LABEL,
    KIND, PROJECT_NAME_LABEL,
};
use crate::utils::{slugify, subject_label};

const NAME_LENGTH: std::ops::RangeInclusive<usize> = 3..=30;
const MAX_DESCRIPTION_LENGTH: usize = 255;

#[utoipa::path(
    get,
    path = "/projects",
    tag = "Projects",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Projects the caller may read", body = [Project]),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn list_projects(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<Vec<Project>>> {
    let list = state.kube.list(&state.projects, None).await?;

    let mut projects = Vec::with_capacity(list.items.len());
    for item in list.items {
        let project = decode(item)?;
        match state.store.decide(
            &principal.subject,
            &project.metadata.name,
            resources::PROJECT,
            actions::READ,
        ) {
            Ok(true) => projects.push(project),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(project = %project.metadata.name, error = %err, "skipping project with broken policy");
            }
        }
    }

    Ok(Json(projects))
}

#[utoipa::path(
    get,
    path = "/projects/{project_id}",
    tag = "Projects",
    security(("bearerAuth" = [])),
    params(("project_id" = String, Path, description = "Project name")),
    responses(
        (status = 200, description = "Project detail", body = Project),
        (status = 403, description = "Caller may not read this project"),
        (status = 404, description = "Project not found")
    )
)]
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> AppResult<Json<Project>> {
    let object = state
        .kube
        .get(&state.projects, &project_id)
        .await?
        .ok_or_else(|| AppError::not_found("project not found"))?;

    Ok(Json(decode(object)?))
}

#[utoipa::path(
    post,
    path = "/projects",
    tag = "Projects",
    security(("bearerAuth" = [])),
    request_body = ProjectCreateRequest,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 400, description = "Invalid name or description"),
        (status = 403, description = "The token carries no subject to make admin"),
        (status = 409, description = "A project with the same name exists")
    )
)]
pub async fn create_project(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<ProjectCreateRequest>,
) -> AppResult<(StatusCode, Json<Project>)> {
    if principal.subject.is_empty() {
        return Err(AppError::forbidden("token has no subject claim"));
    }
    validate(&payload)?;

    let name = slugify(&payload.name);
    if name.is_empty() {
        return Err(AppError::bad_request("name must contain letters or digits"));
    }

    if state.kube.get(&state.projects, &name).await?.is_some() {
        return Err(AppError::conflict(
            "a project with the same name already exists; project names are unique within the platform",
        ));
    }

    let project = new_project(&name, &payload, &principal.subject, &state.projects.namespace);
    let object = serde_json::to_value(&project)
        .map_err(|err| AppError::internal(format!("failed to encode project: {err}")))?;

    let created = match state.kube.create(&state.projects, &object).await {
        Ok(created) => created,
        Err(err) if err.is_conflict() => {
            return Err(AppError::conflict(format!("project `{name}` already exists")))
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!(project = %name, created_by = %principal.subject, "project created");
    Ok((StatusCode::CREATED, Json(decode(created)?)))
}

fn validate(payload: &ProjectCreateRequest) -> AppResult<()> {
    let name_length = payload.name.chars().count();
    if !NAME_LENGTH.contains(&name_length) {
        return Err(AppError::bad_request(format!(
            "name must be between {} and {} characters",
            NAME_LENGTH.start(),
            NAME_LENGTH.end()
        )));
    }
    if payload.description.chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(AppError::bad_request(format!(
            "description must be at most {MAX_DESCRIPTION_LENGTH} characters"
        )));
    }
    Ok(())
}

/// The creator becomes the project's admin; admins get every action on
/// every resource of the project.
fn new_project(name: &str, payload: &ProjectCreateRequest, creator: &str, namespace: &str) -> Project {
    let labels = BTreeMap::from([
        (PROJECT_NAME_LABEL.to_string(), name.to_string()),
        (CREATED_BY_LABEL.to_string(), subject_label(creator)),
    ]);

    let rules = actions::ALL
        .iter()
        .map(|action| RuleSpec::policy(roles::ADMIN, name, "*", action))
        .collect();

    Project {
        api_version: Project::group_version(),
        kind: KIND.to_string(),
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            labels,
            ..ObjectMeta::default()
        },
        spec: ProjectSpec {
            name: payload.name.clone(),
            description: payload.description.clone(),
            rbac: RbacSpec {
                rules,
                groups: vec![RuleSpec::grouping(creator, roles::ADMIN, name)],
            },
        },
    }
}

fn decode(object: Value) -> AppResult<Project> {
    serde_path_to_error::deserialize(object).map_err(|err| {
        AppError::internal(format!("malformed project at `{}`: {}", err.path(), err.inner()))
    })
}
