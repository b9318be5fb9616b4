pub mod args;
pub mod validate;

use std::{any::Any, backtrace::Backtrace, panic::AssertUnwindSafe, sync::Arc};

use actix_web::{
  get,
  http::StatusCode as ActixStatusCode,
  post, route,
  web::{self, Bytes},
  App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use anyhow::Context;
use futures_util::FutureExt;
use shield_common::{
  graphql::GraphQLResponse,
  http::{
    HeaderName, HeaderValue, HttpHeadersMap, Method, ShieldHttpRequest, ShieldHttpResponse,
    StatusCode,
  },
};
use shield_config::ShieldConfig;
use shield_engine::{
  body_limit::read_body_limited, source::graphql_source::GraphQLSourceRuntime,
  source::runtime::SourceRuntime, ProtectionPipeline, SchemaAwareness,
};
use shield_persisted_operations::PersistedOperationsStore;
use tracing::{debug, error, info};

pub use validate::load_schema;

/// Panic payload that must not be caught: the connection is torn down instead
/// of answering with a 500.
#[derive(Debug)]
pub struct AbortRequest;

pub struct ShieldState {
  pub pipeline: Arc<ProtectionPipeline>,
  pub store: Option<Arc<PersistedOperationsStore>>,
  pub max_body_bytes: Option<usize>,
}

/// Logs every panic with its backtrace, except the `AbortRequest` signal.
pub fn install_panic_hook() {
  std::panic::set_hook(Box::new(|info| {
    if info.payload().is::<AbortRequest>() {
      return;
    }

    error!(
      "panic while handling request: {}\n{}",
      info,
      Backtrace::force_capture()
    );
  }));
}

pub async fn build_state(
  config: &ShieldConfig,
  source: Arc<dyn SourceRuntime>,
) -> anyhow::Result<(ShieldState, Arc<SchemaAwareness>)> {
  let store = match config.persisted_operations.enabled {
    true => Some(
      PersistedOperationsStore::from_config(&config.persisted_operations, &config.base_path)
        .await
        .context("failed to create persisted operations store")?,
    ),
    false => None,
  };
  let schema = load_schema(config).await?;
  let pipeline = ProtectionPipeline::new(config, store.clone(), schema.clone(), source);

  Ok((
    ShieldState {
      pipeline: Arc::new(pipeline),
      store,
      max_body_bytes: config.web.max_body_bytes,
    },
    schema,
  ))
}

pub fn configure_app(
  cfg: &mut web::ServiceConfig,
  state: web::Data<ShieldState>,
  graphql_path: &str,
  debug_endpoint: bool,
) {
  cfg.app_data(state).service(health_handler);

  if debug_endpoint {
    cfg
      .service(debug_persisted_operations_handler)
      .service(reload_persisted_operations_handler);
  }

  cfg.route(graphql_path, web::route().to(graphql_handler));
}

pub async fn run_services(config: ShieldConfig) -> anyhow::Result<()> {
  let source = GraphQLSourceRuntime::new(config.upstream.clone())
    .context("failed to create upstream client")?;
  let (state, schema) = build_state(&config, Arc::new(source)).await?;

  let persisted_refresh = state.store.as_ref().and_then(|store| store.spawn_refresh());
  let schema_refresh = config
    .schema
    .as_ref()
    .and_then(|schema_config| schema_config.reload_interval)
    .and_then(|interval| schema.spawn_refresh(interval));

  let state = web::Data::new(state);
  let graphql_path = config.server.graphql_path.clone();
  let debug_endpoint = config.server.debug_endpoint;
  let server_config = config.server.clone();

  debug!(
    "server is trying to listen on {}:{}",
    server_config.host, server_config.port
  );

  let server = HttpServer::new(move || {
    let state = state.clone();
    let graphql_path = graphql_path.clone();

    App::new().configure(move |cfg| configure_app(cfg, state, &graphql_path, debug_endpoint))
  })
  .shutdown_timeout(server_config.shutdown_timeout.as_secs())
  .bind((server_config.host.as_str(), server_config.port))
  .with_context(|| {
    format!(
      "failed to bind {}:{}",
      server_config.host, server_config.port
    )
  })?
  .run();

  info!(
    "shield is protecting {} on http://{}:{}{}",
    config.upstream.endpoint, server_config.host, server_config.port, server_config.graphql_path
  );

  let result = server.await.context("http server failed");

  for handle in [persisted_refresh, schema_refresh].into_iter().flatten() {
    handle.shutdown().await;
  }
  info!("shield stopped");

  result
}

#[route("/_health", method = "GET", method = "HEAD")]
async fn health_handler() -> impl Responder {
  HttpResponse::Ok().finish()
}

#[get("/debug/persisted-operations")]
async fn debug_persisted_operations_handler(state: web::Data<ShieldState>) -> impl Responder {
  match &state.store {
    Some(store) => HttpResponse::Ok().json(store.snapshot().as_ref()),
    None => HttpResponse::NotFound().finish(),
  }
}

#[post("/debug/persisted-operations/reload")]
async fn reload_persisted_operations_handler(state: web::Data<ShieldState>) -> impl Responder {
  let Some(store) = &state.store else {
    return HttpResponse::NotFound().finish();
  };

  match store.reload(store.reload_config().failure_strategy).await {
    Ok(size) => HttpResponse::Ok().json(serde_json::json!({ "operations": size })),
    Err(e) => {
      error!("explicit persisted operations reload failed: {}", e);
      HttpResponse::InternalServerError().json(serde_json::json!({
        "error": e.to_string(),
        "operations": store.len(),
      }))
    }
  }
}

#[tracing::instrument(level = "debug", skip(req, body))]
fn transform_req(req: &HttpRequest, body: Bytes) -> ShieldHttpRequest {
  let mut headers_map = HttpHeadersMap::new();

  for (key, value) in req.headers().iter() {
    if let (Ok(key), Ok(value)) = (
      HeaderName::from_bytes(key.as_str().as_bytes()),
      HeaderValue::from_bytes(value.as_bytes()),
    ) {
      headers_map.append(key, value);
    }
  }

  ShieldHttpRequest {
    body,
    headers: headers_map,
    method: Method::from_bytes(req.method().as_str().as_bytes()).unwrap_or_default(),
    uri: req.uri().to_string(),
    query_string: req.query_string().to_string(),
  }
}

#[tracing::instrument(level = "debug", skip(shield_response))]
fn transform_res(shield_response: ShieldHttpResponse) -> HttpResponse {
  let status = ActixStatusCode::from_u16(shield_response.status.as_u16())
    .unwrap_or(ActixStatusCode::INTERNAL_SERVER_ERROR);
  let mut response = HttpResponse::build(status);

  for (key, value) in shield_response.headers.iter() {
    response.append_header((key.as_str(), value.as_bytes()));
  }

  response.body(shield_response.body)
}

fn internal_error_response() -> ShieldHttpResponse {
  GraphQLResponse::new_error("internal server error")
    .into_with_status_code(StatusCode::INTERNAL_SERVER_ERROR)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
  if let Some(message) = panic.downcast_ref::<&str>() {
    message
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.as_str()
  } else {
    "unknown panic payload"
  }
}

#[tracing::instrument(level = "debug", skip(req, payload, state), name = "shield_bin::handler")]
async fn graphql_handler(
  req: HttpRequest,
  payload: web::Payload,
  state: web::Data<ShieldState>,
) -> HttpResponse {
  let mut request = transform_req(&req, Bytes::new());

  if let Some(response) = state.pipeline.method_gate_rejection(&request) {
    return transform_res(response);
  }

  request.body = match read_body_limited(payload, state.max_body_bytes).await {
    Ok(body) => body,
    Err(e) => {
      debug!("{}", e);
      return transform_res(e.into());
    }
  };

  let pipeline = state.pipeline.clone();

  match AssertUnwindSafe(async move { pipeline.execute(request).await })
    .catch_unwind()
    .await
  {
    Ok(response) => transform_res(response),
    Err(panic) => {
      if panic.is::<AbortRequest>() {
        std::panic::resume_unwind(panic);
      }

      error!("request handling panicked: {}", panic_message(panic.as_ref()));
      transform_res(internal_error_response())
    }
  }
}
