use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use mitsumori_agent::runtime::AssistantRuntime;
use mitsumori_core::config::{AppConfig, NumberingConfig};
use mitsumori_core::{ApprovalWorkflow, AuditSink};
use mitsumori_db::repositories::{
    BillingRepository, EstimateRepository, InMemoryBillingRepository, InMemoryEstimateRepository,
    InMemoryInvoiceRepository, InMemoryMaintenanceRepository, InMemoryMoneyForwardTokenStore,
    InMemoryProductRepository, InvoiceRepository, MaintenanceRepository, MoneyForwardTokenStore,
    ProductRepository, SqlBillingRepository, SqlEstimateRepository, SqlInvoiceRepository,
    SqlMaintenanceRepository, SqlMoneyForwardTokenStore, SqlProductRepository,
};
use mitsumori_db::DbPool;
use tower_http::trace::TraceLayer;

use crate::audit::TracingAuditSink;
use crate::bootstrap::BootstrapError;
use crate::directory::{self, Directory, HttpDirectory};
use crate::money_forward::{self, MoneyForwardClient};
use crate::print::EstimatePrinter;
use crate::{assistant, catalog, estimates, invoices, maintenance};

pub type Workflow = ApprovalWorkflow<Arc<dyn AuditSink>>;

pub struct Repositories {
    pub estimates: Arc<dyn EstimateRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub invoices: Arc<dyn InvoiceRepository>,
    pub maintenance: Arc<dyn MaintenanceRepository>,
    pub billings: Arc<dyn BillingRepository>,
    pub money_forward_tokens: Arc<dyn MoneyForwardTokenStore>,
}

impl Repositories {
    pub fn sql(pool: &DbPool) -> Self {
        Self {
            estimates: Arc::new(SqlEstimateRepository::new(pool.clone())),
            products: Arc::new(SqlProductRepository::new(pool.clone())),
            invoices: Arc::new(SqlInvoiceRepository::new(pool.clone())),
            maintenance: Arc::new(SqlMaintenanceRepository::new(pool.clone())),
            billings: Arc::new(SqlBillingRepository::new(pool.clone())),
            money_forward_tokens: Arc::new(SqlMoneyForwardTokenStore::new(pool.clone())),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            estimates: Arc::new(InMemoryEstimateRepository::default()),
            products: Arc::new(InMemoryProductRepository::default()),
            invoices: Arc::new(InMemoryInvoiceRepository::default()),
            maintenance: Arc::new(InMemoryMaintenanceRepository::default()),
            billings: Arc::new(InMemoryBillingRepository::default()),
            money_forward_tokens: Arc::new(InMemoryMoneyForwardTokenStore::default()),
        }
    }
}

/// Shared handles for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub estimates: Arc<dyn EstimateRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub invoices: Arc<dyn InvoiceRepository>,
    pub maintenance: Arc<dyn MaintenanceRepository>,
    pub billings: Arc<dyn BillingRepository>,
    pub workflow: Arc<Workflow>,
    pub numbering: NumberingConfig,
    pub money_forward: Arc<MoneyForwardClient>,
    pub directory: Option<Arc<dyn Directory>>,
    pub assistant: Option<Arc<AssistantRuntime>>,
    pub printer: Arc<EstimatePrinter>,
}

impl AppState {
    /// Wires repositories and integrations from `config`. The LLM client and the directory
    /// proxy are left out when their configuration disables them.
    pub fn new(
        config: &AppConfig,
        repositories: Repositories,
        printer: EstimatePrinter,
    ) -> Result<Self, BootstrapError> {
        let money_forward = MoneyForwardClient::new(
            config.money_forward.clone(),
            repositories.money_forward_tokens,
        )?;
        let directory = HttpDirectory::from_config(&config.directory)?
            .map(|directory| Arc::new(directory) as Arc<dyn Directory>);
        let assistant = AssistantRuntime::from_config(&config.llm)?.map(Arc::new);
        let sink: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

        Ok(Self {
            estimates: repositories.estimates,
            products: repositories.products,
            invoices: repositories.invoices,
            maintenance: repositories.maintenance,
            billings: repositories.billings,
            workflow: Arc::new(ApprovalWorkflow::new(sink)),
            numbering: config.numbering.clone(),
            money_forward: Arc::new(money_forward),
            directory,
            assistant,
            printer: Arc::new(printer),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/estimates", get(estimates::list_estimates).post(estimates::create_estimate))
        .route(
            "/api/estimates/{id}",
            get(estimates::get_estimate)
                .put(estimates::update_estimate)
                .delete(estimates::delete_estimate),
        )
        .route("/api/estimates/{id}/duplicate", post(estimates::duplicate_estimate))
        .route("/api/estimates/{id}/submit", post(estimates::submit_estimate))
        .route("/api/estimates/{id}/cancel", post(estimates::cancel_submission))
        .route("/api/estimates/{id}/approve", post(estimates::approve_estimate))
        .route("/api/estimates/{id}/reject", post(estimates::reject_estimate))
        .route("/api/estimates/{id}/requirements-check", post(estimates::check_requirements))
        .route("/api/estimates/{id}/confirm-order", post(estimates::confirm_order))
        .route("/api/estimates/{id}/invoice", post(estimates::convert_to_invoice))
        .route("/api/estimates/{id}/print", get(estimates::print_estimate))
        .route("/api/estimates/{id}/money-forward/quote", post(money_forward::push_quote))
        .route("/api/products", get(catalog::list_products).post(catalog::create_product))
        .route("/api/products/{id}", get(catalog::get_product).put(catalog::update_product))
        .route("/api/categories", get(catalog::list_categories).post(catalog::create_category))
        .route("/api/invoices", get(invoices::list_invoices))
        .route("/api/invoices/{id}", get(invoices::get_invoice))
        .route(
            "/api/maintenance-fees",
            get(maintenance::list_fees).post(maintenance::create_fee),
        )
        .route("/api/maintenance-fees/summary", get(maintenance::monthly_summary))
        .route(
            "/api/maintenance-fees/{id}",
            axum::routing::put(maintenance::update_fee).delete(maintenance::delete_fee),
        )
        .route("/api/money-forward/oauth/start", get(money_forward::oauth_start))
        .route("/api/money-forward/oauth/callback", get(money_forward::oauth_callback))
        .route("/api/money-forward/status", get(money_forward::connection_status))
        .route("/api/money-forward/billings/sync", post(money_forward::sync_billings))
        .route("/api/billings", get(money_forward::list_billings))
        .route("/api/directory/customers", get(directory::search_customers))
        .route("/api/directory/users", get(directory::list_users))
        .route("/api/ai/requirements", post(assistant::gather_requirements))
        .route("/api/ai/draft-estimate", post(assistant::draft_estimate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
impl AppState {
    pub fn with_assistant(mut self, assistant: AssistantRuntime) -> Self {
        self.assistant = Some(Arc::new(assistant));
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.workflow = Arc::new(ApprovalWorkflow::new(sink));
        self
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use mitsumori_core::config::AppConfig;

    use super::{AppState, Repositories};
    use crate::print::EstimatePrinter;

    /// In-memory state with integrations disabled and HTML-only printing.
    pub fn state() -> AppState {
        let printer = EstimatePrinter::with_embedded_templates().expect("templates").html_only();
        AppState::new(&AppConfig::default(), Repositories::in_memory(), printer).expect("state")
    }
}
