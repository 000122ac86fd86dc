//! `/crm` route handlers.
//!
//! Handlers only translate HTTP into service calls; ownership, validation
//! and transactions live in the core crate.

use crate::error::ApiError;
use crate::extract::{json_body, parse_id, query_params, CallerId};
use crate::state::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use relcrm_core::model::activity::{ActivityDraft, ClientActivity};
use relcrm_core::model::contact::{ClientContact, ContactDraft};
use relcrm_core::model::document::{Document, DocumentDraft};
use relcrm_core::model::reminder::{ReminderDraft, ReminderView};
use relcrm_core::service::timeline::ReminderAgenda;
use relcrm_core::{
    ActivityStats, ClientAggregate, ClientDraft, ClientId, ClientListQuery, ClientSummary,
    DuplicateGroup, DuplicateScanService, MergeCoordinator, MergeOutcome, MergeRequest, Priority,
    TimelineService,
};
use serde::Deserialize;
use std::sync::Arc;

type ApiResult<T> = Result<T, ApiError>;
type SharedState = State<Arc<AppState>>;

pub fn crm_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/crm/clients", get(list_clients).post(create_client))
        .route(
            "/crm/clients/{id}",
            get(get_client).put(update_client).delete(delete_client),
        )
        .route("/crm/contacts", get(list_contacts).post(create_contact))
        .route(
            "/crm/contacts/{id}",
            put(update_contact).delete(delete_contact),
        )
        .route("/crm/activities", get(list_activities).post(create_activity))
        .route("/crm/reminders", get(list_reminders).post(create_reminder))
        .route("/crm/reminders/agenda", get(reminder_agenda))
        .route(
            "/crm/reminders/{id}",
            put(update_reminder).delete(delete_reminder),
        )
        .route("/crm/reminders/{id}/complete", post(complete_reminder))
        .route("/crm/documents", get(list_documents).post(create_document))
        .route("/crm/documents/{id}", delete(delete_document))
        .route("/crm/duplicates", get(list_duplicates))
        .route("/crm/merge", post(merge_clients))
        .route("/crm/activity-stats", get(activity_stats))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientListParams {
    search: Option<String>,
    stage_id: Option<String>,
    priority: Option<Priority>,
    tag: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl From<ClientListParams> for ClientListQuery {
    fn from(params: ClientListParams) -> Self {
        Self {
            search: params.search,
            stage_id: params.stage_id,
            priority: params.priority,
            tag: params.tag,
            limit: params.limit,
            offset: params.offset.unwrap_or(0),
        }
    }
}

/// `?clientId=` scope for child collections.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientScope {
    client_id: ClientId,
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DaysParams {
    days: Option<u32>,
}

async fn list_clients(
    State(state): SharedState,
    CallerId(owner): CallerId,
    query: Result<Query<ClientListParams>, QueryRejection>,
) -> ApiResult<Json<Vec<ClientSummary>>> {
    let query = ClientListQuery::from(query_params(query)?);
    let clients = state
        .run(move |conn, state| Ok(state.client_service(conn, owner).list_clients(&query)?))
        .await?;
    Ok(Json(clients))
}

async fn get_client(
    State(state): SharedState,
    CallerId(owner): CallerId,
    Path(id): Path<String>,
) -> ApiResult<Json<ClientAggregate>> {
    let id = parse_id(&id)?;
    let client = state
        .run(move |conn, state| Ok(state.client_service(conn, owner).get_client(id)?))
        .await?;
    Ok(Json(client))
}

async fn create_client(
    State(state): SharedState,
    CallerId(owner): CallerId,
    payload: Result<Json<ClientDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ClientAggregate>)> {
    let draft = json_body(payload)?;
    let client = state
        .run(move |conn, state| Ok(state.client_service(conn, owner).create_client(draft)?))
        .await?;
    Ok((StatusCode::CREATED, Json(client)))
}

async fn update_client(
    State(state): SharedState,
    CallerId(owner): CallerId,
    Path(id): Path<String>,
    payload: Result<Json<ClientDraft>, JsonRejection>,
) -> ApiResult<Json<ClientAggregate>> {
    let id = parse_id(&id)?;
    let draft = json_body(payload)?;
    let client = state
        .run(move |conn, state| Ok(state.client_service(conn, owner).update_client(id, draft)?))
        .await?;
    Ok(Json(client))
}

async fn delete_client(
    State(state): SharedState,
    CallerId(owner): CallerId,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    state
        .run(move |conn, state| Ok(state.client_service(conn, owner).delete_client(id)?))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_contacts(
    State(state): SharedState,
    CallerId(owner): CallerId,
    scope: Result<Query<ClientScope>, QueryRejection>,
) -> ApiResult<Json<Vec<ClientContact>>> {
    let scope = query_params(scope)?;
    let contacts = state
        .run(move |conn, state| {
            Ok(state
                .client_service(conn, owner)
                .list_contacts(scope.client_id)?)
        })
        .await?;
    Ok(Json(contacts))
}

async fn create_contact(
    State(state): SharedState,
    CallerId(owner): CallerId,
    scope: Result<Query<ClientScope>, QueryRejection>,
    payload: Result<Json<ContactDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ClientContact>)> {
    let scope = query_params(scope)?;
    let draft = json_body(payload)?;
    let contact = state
        .run(move |conn, state| {
            Ok(state
                .client_service(conn, owner)
                .add_contact(scope.client_id, draft)?)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

async fn update_contact(
    State(state): SharedState,
    CallerId(owner): CallerId,
    Path(id): Path<String>,
    payload: Result<Json<ContactDraft>, JsonRejection>,
) -> ApiResult<Json<ClientContact>> {
    let id = parse_id(&id)?;
    let draft = json_body(payload)?;
    let contact = state
        .run(move |conn, state| Ok(state.client_service(conn, owner).update_contact(id, draft)?))
        .await?;
    Ok(Json(contact))
}

async fn delete_contact(
    State(state): SharedState,
    CallerId(owner): CallerId,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    state
        .run(move |conn, state| Ok(state.client_service(conn, owner).delete_contact(id)?))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_activities(
    State(state): SharedState,
    CallerId(owner): CallerId,
    scope: Result<Query<ClientScope>, QueryRejection>,
) -> ApiResult<Json<Vec<ClientActivity>>> {
    let scope = query_params(scope)?;
    let activities = state
        .run(move |conn, state| {
            Ok(state
                .client_service(conn, owner)
                .list_activities(scope.client_id, scope.limit)?)
        })
        .await?;
    Ok(Json(activities))
}

async fn create_activity(
    State(state): SharedState,
    CallerId(owner): CallerId,
    scope: Result<Query<ClientScope>, QueryRejection>,
    payload: Result<Json<ActivityDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ClientActivity>)> {
    let scope = query_params(scope)?;
    let draft = json_body(payload)?;
    let activity = state
        .run(move |conn, state| {
            Ok(state
                .client_service(conn, owner)
                .log_activity(scope.client_id, draft)?)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(activity)))
}

async fn list_reminders(
    State(state): SharedState,
    CallerId(owner): CallerId,
    scope: Result<Query<ClientScope>, QueryRejection>,
) -> ApiResult<Json<Vec<ReminderView>>> {
    let scope = query_params(scope)?;
    let reminders = state
        .run(move |conn, state| {
            Ok(state
                .client_service(conn, owner)
                .list_reminders(scope.client_id)?)
        })
        .await?;
    Ok(Json(reminders))
}

async fn create_reminder(
    State(state): SharedState,
    CallerId(owner): CallerId,
    scope: Result<Query<ClientScope>, QueryRejection>,
    payload: Result<Json<ReminderDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ReminderView>)> {
    let scope = query_params(scope)?;
    let draft = json_body(payload)?;
    let reminder = state
        .run(move |conn, state| {
            Ok(state
                .client_service(conn, owner)
                .add_reminder(scope.client_id, draft)?)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(reminder)))
}

async fn update_reminder(
    State(state): SharedState,
    CallerId(owner): CallerId,
    Path(id): Path<String>,
    payload: Result<Json<ReminderDraft>, JsonRejection>,
) -> ApiResult<Json<ReminderView>> {
    let id = parse_id(&id)?;
    let draft = json_body(payload)?;
    let reminder = state
        .run(move |conn, state| Ok(state.client_service(conn, owner).update_reminder(id, draft)?))
        .await?;
    Ok(Json(reminder))
}

async fn complete_reminder(
    State(state): SharedState,
    CallerId(owner): CallerId,
    Path(id): Path<String>,
) -> ApiResult<Json<ReminderView>> {
    let id = parse_id(&id)?;
    let reminder = state
        .run(move |conn, state| Ok(state.client_service(conn, owner).complete_reminder(id)?))
        .await?;
    Ok(Json(reminder))
}

async fn delete_reminder(
    State(state): SharedState,
    CallerId(owner): CallerId,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    state
        .run(move |conn, state| Ok(state.client_service(conn, owner).delete_reminder(id)?))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reminder_agenda(
    State(state): SharedState,
    CallerId(owner): CallerId,
    params: Result<Query<DaysParams>, QueryRejection>,
) -> ApiResult<Json<ReminderAgenda>> {
    let params = query_params(params)?;
    let agenda = state
        .run(move |conn, state| {
            Ok(TimelineService::new(state.repo(conn, owner)).reminder_agenda(params.days)?)
        })
        .await?;
    Ok(Json(agenda))
}

async fn list_documents(
    State(state): SharedState,
    CallerId(owner): CallerId,
    scope: Result<Query<ClientScope>, QueryRejection>,
) -> ApiResult<Json<Vec<Document>>> {
    let scope = query_params(scope)?;
    let documents = state
        .run(move |conn, state| {
            Ok(state
                .client_service(conn, owner)
                .list_documents(scope.client_id)?)
        })
        .await?;
    Ok(Json(documents))
}

async fn create_document(
    State(state): SharedState,
    CallerId(owner): CallerId,
    scope: Result<Query<ClientScope>, QueryRejection>,
    payload: Result<Json<DocumentDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Document>)> {
    let scope = query_params(scope)?;
    let draft = json_body(payload)?;
    let document = state
        .run(move |conn, state| {
            Ok(state
                .client_service(conn, owner)
                .add_document(scope.client_id, draft)?)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn delete_document(
    State(state): SharedState,
    CallerId(owner): CallerId,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    state
        .run(move |conn, state| Ok(state.client_service(conn, owner).delete_document(id)?))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_duplicates(
    State(state): SharedState,
    CallerId(owner): CallerId,
) -> ApiResult<Json<Vec<DuplicateGroup>>> {
    let report = state
        .run(move |conn, state| {
            let scan = DuplicateScanService::new(
                conn,
                owner,
                &state.codec,
                state.scorer.clone(),
                state.scan_options.clone(),
            );
            Ok(scan.detect()?)
        })
        .await?;
    Ok(Json(report.groups))
}

async fn merge_clients(
    State(state): SharedState,
    CallerId(owner): CallerId,
    payload: Result<Json<MergeRequest>, JsonRejection>,
) -> ApiResult<Json<MergeOutcome>> {
    let request = json_body(payload)?;
    let outcome = state
        .run(move |conn, state| {
            Ok(MergeCoordinator::new(conn, owner, &state.codec)
                .merge(request.keep_id, request.lose_id)?)
        })
        .await?;
    Ok(Json(outcome))
}

async fn activity_stats(
    State(state): SharedState,
    CallerId(owner): CallerId,
    params: Result<Query<DaysParams>, QueryRejection>,
) -> ApiResult<Json<ActivityStats>> {
    let params = query_params(params)?;
    let stats = state
        .run(move |conn, state| {
            Ok(TimelineService::new(state.repo(conn, owner)).activity_stats(params.days)?)
        })
        .await?;
    Ok(Json(stats))
}
