// src/pipeline.rs

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::chart::{build_chart, ChartBindings, ChartSpec};
use crate::config::Settings;
use crate::error::PipelineError;
use crate::fetch::{fetch_with_retry, DatasetRequest, FetchError, HttpFetcher, PayloadCache, RawPayload, RetryPolicy};
use crate::parse::{parse_payload, ParseOptions};
use crate::table::Table;

/// Everything one successful import produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportOutcome {
    pub table: Table,
    pub chart: ChartSpec,
    /// Final URL after redirects.
    pub source: Url,
}

/// Request → payload → table → chart, with no state shared between runs
/// other than the optional payload cache.
#[derive(Debug, Clone)]
pub struct Pipeline {
    fetcher: HttpFetcher,
    options: Arc<ParseOptions>,
    retry: RetryPolicy,
    cache: Option<Arc<PayloadCache>>,
}

impl Pipeline {
    pub fn new(options: ParseOptions) -> Self {
        Self {
            fetcher: HttpFetcher::new(),
            options: Arc::new(options),
            retry: RetryPolicy::none(),
            cache: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let mut pipeline =
            Self::new(settings.parse.to_options()?).with_retry(RetryPolicy::from(&settings.retry));
        if settings.cache.enabled {
            pipeline = pipeline.with_cache(Arc::new(PayloadCache::new()));
        }
        Ok(pipeline)
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_cache(mut self, cache: Arc<PayloadCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    async fn fetch(
        &self,
        request: &DatasetRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<RawPayload>, FetchError> {
        let fetch = || fetch_with_retry(&self.fetcher, request, self.retry, cancel);
        match &self.cache {
            Some(cache) => cache.get_or_fetch(&request.cache_key(), fetch).await,
            None => fetch().await.map(Arc::new),
        }
    }

    /// Run one import. Cancellation is honoured during the fetch and checked
    /// again around parsing; a cancelled run yields no table.
    #[instrument(level = "info", skip_all, fields(url = %request.url(), kind = %bindings.kind))]
    pub async fn run(
        &self,
        request: &DatasetRequest,
        bindings: &ChartBindings,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome, PipelineError> {
        let cancelled = || {
            PipelineError::Fetch(FetchError::Cancelled {
                url: request.url().to_string(),
            })
        };

        let payload = self.fetch(request, cancel).await?;
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        debug!(bytes = payload.len(), content_type = ?payload.content_type(), "payload received");

        let table = {
            let payload = Arc::clone(&payload);
            let options = Arc::clone(&self.options);
            tokio::task::spawn_blocking(move || parse_payload(&payload, &options)).await??
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let chart = build_chart(&table, bindings)?;
        info!(
            rows = table.num_rows(),
            columns = table.num_columns(),
            points = chart.data().len(),
            "import complete"
        );
        Ok(ImportOutcome {
            table,
            chart,
            source: payload.source().clone(),
        })
    }
}

#[derive(Debug, Default)]
struct SessionState {
    generation: u64,
    in_flight: Option<CancellationToken>,
    current: Option<Arc<ImportOutcome>>,
}

/// Per-user holder of the latest good import.
///
/// Starting an import cancels the one in flight. Only the newest import may
/// publish, and a failed import leaves the previous outcome in place.
#[derive(Debug)]
pub struct ImportSession {
    pipeline: Pipeline,
    state: Mutex<SessionState>,
}

impl ImportSession {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub async fn import(
        &self,
        request: &DatasetRequest,
        bindings: &ChartBindings,
    ) -> Result<Arc<ImportOutcome>, PipelineError> {
        let (generation, token) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = state.in_flight.take() {
                debug!(generation = state.generation, "cancelling superseded import");
                previous.cancel();
            }
            state.generation += 1;
            let token = CancellationToken::new();
            state.in_flight = Some(token.clone());
            (state.generation, token)
        };

        let result = self.pipeline.run(request, bindings, &token).await;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation != generation {
            warn!(generation, latest = state.generation, "discarding superseded import");
            return Err(PipelineError::Superseded);
        }
        state.in_flight = None;
        let outcome = Arc::new(result?);
        state.current = Some(Arc::clone(&outcome));
        Ok(outcome)
    }

    /// Cancel the import in flight, if any.
    pub fn cancel(&self) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = &state.in_flight {
            token.cancel();
        }
    }

    pub fn current(&self) -> Option<Arc<ImportOutcome>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{Aggregation, ChartKind, Datum};
    use crate::error::ErrorKind;
    use crate::test_util::{init_test_logging, Response, TestServer};
    use futures::future::join_all;
    use std::time::Duration;

    const SALES_CSV: &str = "region,sales\nA,10\nB,20\nA,30\n";

    fn route(path: &str) -> Response {
        match path {
            "/sales.csv" => Response::ok("text/csv", SALES_CSV),
            "/other.csv" => Response::ok("text/csv", "region,sales\nC,1\n"),
            "/slow.csv" => Response::ok("text/csv", SALES_CSV).delayed(Duration::from_secs(5)),
            "/empty.csv" => Response::ok("text/csv", ""),
            _ => Response::status(404),
        }
    }

    fn request(server: &TestServer, path: &str) -> DatasetRequest {
        DatasetRequest::builder(server.url(path)).build().unwrap()
    }

    fn mean_by_region() -> ChartBindings {
        ChartBindings::new(ChartKind::Bar, "region")
            .y("sales")
            .aggregate(Aggregation::Mean)
    }

    #[tokio::test]
    async fn run_produces_table_and_chart() {
        init_test_logging();
        let server = TestServer::start(route).await;
        let outcome = Pipeline::new(ParseOptions::default())
            .run(&request(&server, "/sales.csv"), &mean_by_region(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.table.num_rows(), 3);
        assert_eq!(outcome.chart.data().len(), 2);
        assert_eq!(outcome.chart.data()[0].y, Some(Datum::Float(20.0)));
        assert_eq!(outcome.source.path(), "/sales.csv");

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["table"]["num_rows"], 3);
        assert_eq!(json["chart"]["aggregation"], "mean");
    }

    #[tokio::test]
    async fn each_stage_reports_its_error_kind() {
        init_test_logging();
        let server = TestServer::start(route).await;
        let pipeline = Pipeline::new(ParseOptions::default());
        let cancel = CancellationToken::new();

        let err = pipeline
            .run(&request(&server, "/missing.csv"), &mean_by_region(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HttpStatusError);

        let err = pipeline
            .run(&request(&server, "/empty.csv"), &mean_by_region(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyDatasetError);

        let bindings = ChartBindings::new(ChartKind::Line, "region").y("revenue");
        let err = pipeline
            .run(&request(&server, "/sales.csv"), &bindings, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownColumnError);
        assert!(err.report().message.contains("revenue"));
    }

    #[tokio::test]
    async fn failed_import_keeps_previous_outcome() {
        init_test_logging();
        let server = TestServer::start(route).await;
        let session = ImportSession::new(Pipeline::new(ParseOptions::default()));
        assert!(session.current().is_none());

        let first = session
            .import(&request(&server, "/sales.csv"), &mean_by_region())
            .await
            .unwrap();
        let err = session
            .import(&request(&server, "/missing.csv"), &mean_by_region())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HttpStatusError);
        assert!(Arc::ptr_eq(&session.current().unwrap(), &first));
    }

    #[tokio::test]
    async fn newer_import_supersedes_in_flight_one() {
        init_test_logging();
        let server = TestServer::start(route).await;
        let session = ImportSession::new(Pipeline::new(ParseOptions::default()));
        let slow = request(&server, "/slow.csv");
        let fast = request(&server, "/other.csv");
        let bindings = mean_by_region();

        let (old, new) = tokio::join!(session.import(&slow, &bindings), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            session.import(&fast, &bindings).await
        });

        assert!(matches!(old, Err(PipelineError::Superseded)));
        let new = new.unwrap();
        assert_eq!(new.source.path(), "/other.csv");
        assert!(Arc::ptr_eq(&session.current().unwrap(), &new));
    }

    #[tokio::test]
    async fn cancelled_import_leaves_nothing_and_next_one_works() {
        init_test_logging();
        let server = TestServer::start(route).await;
        let session = ImportSession::new(Pipeline::new(ParseOptions::default()));
        let bindings = mean_by_region();
        let slow = request(&server, "/slow.csv");

        let (cancelled, _) = tokio::join!(
            session.import(&slow, &bindings),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                session.cancel();
            }
        );
        assert_eq!(cancelled.unwrap_err().kind(), ErrorKind::Cancelled);
        assert!(session.current().is_none());

        let outcome = session
            .import(&request(&server, "/sales.csv"), &bindings)
            .await
            .unwrap();
        assert_eq!(outcome.table.num_rows(), 3);
    }

    #[tokio::test]
    async fn cached_pipeline_fetches_once_for_concurrent_runs() {
        init_test_logging();
        let server = TestServer::start(route).await;
        let pipeline = Pipeline::new(ParseOptions::default()).with_cache(Arc::new(PayloadCache::new()));
        let req = request(&server, "/sales.csv");
        let bindings = mean_by_region();
        let cancel = CancellationToken::new();

        let results = join_all((0..4).map(|_| pipeline.run(&req, &bindings, &cancel))).await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(server.hits(), 1);
    }

    #[test]
    fn settings_configure_the_pipeline() -> anyhow::Result<()> {
        let settings = Settings::from_yaml(
            "retry:\n  enabled: true\n  max_retries: 2\ncache:\n  enabled: true\nparse:\n  sheet: Costs\n",
        )?;
        let pipeline = Pipeline::from_settings(&settings)?;
        assert_eq!(pipeline.retry.max_retries, 2);
        assert!(pipeline.cache.is_some());
        assert_eq!(pipeline.options().sheet.as_deref(), Some("Costs"));
        Ok(())
    }
}
