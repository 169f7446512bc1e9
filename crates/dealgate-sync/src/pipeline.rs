use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use dealgate_adapters::{AdapterError, AssistRequest, AssistantAdapter};
use dealgate_core::{
    confirm_pending_move, dashboard_scope, is_admin, plan_stage_move, visible_to,
    ChecklistConfirmation, GateError, NewOpportunity, Opportunity, OpportunityDraft,
    OpportunityFilter, PendingStageMove, PortfolioMetrics, StageMove, StageTransition, Vendor,
};
use dealgate_storage::{resolve_vendors, OpportunityStore, SessionStore, VendorRoster};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    Clock, DeleteConfirmation, DeleteOutcome, MoveOutcome, PipelineConfig, PipelineError,
    PipelineState, SystemClock,
};

const LOAD_FAILED: &str = "Could not load opportunities. Please try again.";

/// Owns the cached view of the pipeline and every write that changes it.
pub struct Pipeline {
    store: Arc<dyn OpportunityStore>,
    session: SessionStore,
    roster: VendorRoster,
    assistant: Option<Arc<dyn AssistantAdapter>>,
    clock: Arc<dyn Clock>,
    default_vendor: Option<String>,
    resync_cron: Option<String>,
    state: RwLock<PipelineState>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn OpportunityStore>, session: SessionStore, roster: VendorRoster) -> Self {
        Self {
            store,
            session,
            roster,
            assistant: None,
            clock: Arc::new(SystemClock),
            default_vendor: None,
            resync_cron: None,
            state: RwLock::new(PipelineState::default()),
        }
    }

    pub fn from_config(config: &PipelineConfig, store: Arc<dyn OpportunityStore>) -> anyhow::Result<Self> {
        let roster = VendorRoster::load(&config.roster_file)?;
        let mut pipeline = Self::new(store, SessionStore::new(config.session_file.clone()), roster);
        pipeline.assistant = config.build_assistant().context("building assistant client")?;
        pipeline.default_vendor = config.default_vendor.clone();
        if config.resync_enabled {
            pipeline.resync_cron = Some(config.resync_cron.clone());
        }
        Ok(pipeline)
    }

    pub fn with_assistant(mut self, assistant: Arc<dyn AssistantAdapter>) -> Self {
        self.assistant = Some(assistant);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.default_vendor = Some(vendor.into());
        self
    }

    pub fn with_resync(mut self, cron: impl Into<String>) -> Self {
        self.resync_cron = Some(cron.into());
        self
    }

    pub fn roster(&self) -> &VendorRoster {
        &self.roster
    }

    pub fn has_assistant(&self) -> bool {
        self.assistant.is_some()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    async fn set_banner(&self, message: impl Into<String>) {
        self.state.write().await.error = Some(message.into());
    }

    pub async fn clear_banner(&self) {
        self.state.write().await.error = None;
    }

    /// Replaces the cache with the store's rows. On failure the cache is
    /// emptied rather than left stale.
    pub async fn load_opportunities(&self) -> Result<usize, PipelineError> {
        {
            let mut state = self.state.write().await;
            state.loading = true;
            state.error = None;
        }

        let result = self.store.list_opportunities().await;
        let mut state = self.state.write().await;
        state.loading = false;
        state.revision += 1;
        match result {
            Ok(rows) => {
                let count = rows.len();
                refresh_selection(&mut state.selection, &rows);
                state.opportunities = rows;
                debug!(count, revision = state.revision, "opportunities loaded");
                Ok(count)
            }
            Err(err) => {
                error!(error = %err, "loading opportunities failed");
                state.error = Some(LOAD_FAILED.to_string());
                state.opportunities.clear();
                Err(err.into())
            }
        }
    }

    /// Reload after a write; a failure here is already on the banner.
    async fn reload_quietly(&self) {
        if let Err(err) = self.load_opportunities().await {
            warn!(error = %err, "reload after write failed");
        }
    }

    /// Resolves the team and, if nobody is signed in yet, restores the
    /// remembered salesperson or falls back to the first vendor.
    pub async fn load_vendors(&self) -> Vec<Vendor> {
        let vendors = resolve_vendors(self.store.as_ref(), &self.roster).await;

        let needs_user = {
            let mut state = self.state.write().await;
            state.vendors = vendors.clone();
            state.current_user.is_none()
        };
        if needs_user {
            let remembered = match self.session.load_current_user().await {
                Ok(user) => user,
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "could not read session file");
                    None
                }
            };
            let chosen = remembered
                .filter(|name| vendors.iter().any(|v| &v.name == name))
                .or_else(|| vendors.first().map(|v| v.name.clone()));
            if let Some(user) = chosen {
                if let Err(err) = self.set_current_user(&user).await {
                    warn!(error = %err, "could not persist current user");
                }
            }
        }
        vendors
    }

    pub async fn set_current_user(&self, user: &str) -> Result<(), PipelineError> {
        self.state.write().await.current_user = Some(user.to_string());
        self.session
            .save_current_user(user)
            .await
            .map_err(PipelineError::Session)?;
        info!(user, "current user set");
        Ok(())
    }

    async fn default_vendor(&self) -> String {
        let state = self.state.read().await;
        state
            .current_user
            .clone()
            .or_else(|| self.default_vendor.clone())
            .or_else(|| state.vendors.first().map(|v| v.name.clone()))
            .or_else(|| self.roster.defaults.first().cloned())
            .unwrap_or_default()
    }

    async fn validate(&self, draft: &OpportunityDraft) -> Result<NewOpportunity, PipelineError> {
        let default_vendor = self.default_vendor().await;
        match draft.validate(&default_vendor, self.today()) {
            Ok(record) => {
                self.clear_banner().await;
                Ok(record)
            }
            Err(err) => {
                self.set_banner(format!("Please complete the required fields: {err}")).await;
                Err(err.into())
            }
        }
    }

    pub async fn create_opportunity(&self, draft: &OpportunityDraft) -> Result<Opportunity, PipelineError> {
        let record = self.validate(draft).await?;
        match self.store.insert(record).await {
            Ok(created) => {
                info!(id = %created.id, name = %created.name, "opportunity created");
                self.reload_quietly().await;
                Ok(created)
            }
            Err(err) => {
                error!(error = %err, "creating opportunity failed");
                self.set_banner(format!("Could not create opportunity: {err}")).await;
                Err(err.into())
            }
        }
    }

    pub async fn update_opportunity(
        &self,
        id: Uuid,
        draft: &OpportunityDraft,
    ) -> Result<Opportunity, PipelineError> {
        let record = self.validate(draft).await?;
        match self.store.update(id, record.into_patch()).await {
            Ok(updated) => {
                info!(%id, "opportunity updated");
                self.reload_quietly().await;
                Ok(updated)
            }
            Err(err) => {
                error!(%id, error = %err, "updating opportunity failed");
                self.set_banner(format!("Could not update opportunity: {err}")).await;
                Err(err.into())
            }
        }
    }

    pub async fn delete_opportunity(
        &self,
        id: Uuid,
        confirmation: DeleteConfirmation,
    ) -> Result<DeleteOutcome, PipelineError> {
        if confirmation != DeleteConfirmation::Confirmed {
            debug!(%id, "delete not confirmed");
            return Ok(DeleteOutcome::Cancelled);
        }

        self.clear_banner().await;
        match self.store.delete(id).await {
            Ok(()) => {
                let mut state = self.state.write().await;
                state.opportunities.retain(|o| o.id != id);
                state.revision += 1;
                clear_selection_for(&mut state, id);
                info!(%id, "opportunity deleted");
                Ok(DeleteOutcome::Deleted)
            }
            Err(err) => {
                error!(%id, error = %err, "deleting opportunity failed");
                self.reload_quietly().await;
                self.set_banner("Could not delete opportunity. Please try again.").await;
                Err(err.into())
            }
        }
    }

    pub async fn opportunity(&self, id: Uuid) -> Option<Opportunity> {
        self.state.read().await.opportunity(id).cloned()
    }

    pub async fn request_stage_move(&self, id: Uuid, target: u8) -> Result<MoveOutcome, PipelineError> {
        let opportunity = self.opportunity(id).await.ok_or(PipelineError::NotFound(id))?;
        match plan_stage_move(&opportunity, target, self.today()) {
            Ok(StageMove::Direct(transition)) => self.commit(id, transition).await.map(MoveOutcome::Moved),
            Ok(StageMove::RequiresChecklist(pending)) => {
                info!(%id, from = pending.from_stage, target, "stage gate not met; checklist required");
                Ok(MoveOutcome::ChecklistRequired(pending))
            }
            Err(GateError::UnknownStage(stage)) => {
                warn!(%id, stage, "ignoring move to unknown stage");
                Ok(MoveOutcome::Ignored)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Commits a held-back move once the leaving stage's checklist is complete
    /// and the deal has not moved in the meantime.
    pub async fn confirm_stage_move(
        &self,
        pending: &PendingStageMove,
        confirmation: &ChecklistConfirmation,
    ) -> Result<Opportunity, PipelineError> {
        let id = pending.opportunity_id;
        let current = self.opportunity(id).await.ok_or(PipelineError::NotFound(id))?;
        if current.stage != pending.from_stage {
            return Err(GateError::StaleMove {
                expected: pending.from_stage,
                actual: current.stage,
            }
            .into());
        }
        let transition = confirm_pending_move(pending, confirmation, self.today())?;
        info!(%id, from = pending.from_stage, to = transition.stage, "checklist confirmed");
        self.commit(id, transition).await
    }

    /// Writes `{stage, probability, last_update}` and patches the cached row.
    pub async fn commit(&self, id: Uuid, transition: StageTransition) -> Result<Opportunity, PipelineError> {
        self.clear_banner().await;
        match self.store.update(id, transition.to_patch()).await {
            Ok(stored) => {
                let mut guard = self.state.write().await;
                let state = &mut *guard;
                let cached = match state.opportunities.iter_mut().find(|o| o.id == id) {
                    Some(row) => {
                        row.apply_transition(&transition);
                        row.clone()
                    }
                    None => stored,
                };
                state.revision += 1;
                for slot in [&mut state.selection.selected, &mut state.selection.editing] {
                    if let Some(tracked) = slot.as_mut().filter(|o| o.id == id) {
                        tracked.apply_transition(&transition);
                    }
                }
                info!(%id, stage = transition.stage, probability = transition.probability, "stage updated");
                Ok(cached)
            }
            Err(err) => {
                error!(%id, error = %err, "stage update failed");
                self.reload_quietly().await;
                self.set_banner("Could not update stage. Please try again.").await;
                Err(err.into())
            }
        }
    }

    pub async fn select_opportunity(&self, id: Option<Uuid>) -> Option<Opportunity> {
        let mut state = self.state.write().await;
        let found = id.and_then(|id| state.opportunity(id).cloned());
        state.selection.selected = found.clone();
        found
    }

    pub async fn edit_opportunity(&self, id: Option<Uuid>) -> Option<Opportunity> {
        let mut state = self.state.write().await;
        let found = id.and_then(|id| state.opportunity(id).cloned());
        state.selection.editing = found.clone();
        found
    }

    /// Swaps in a revised record wherever it is tracked. Returns whether
    /// anything matched.
    pub async fn merge_assistant_update(&self, revised: Opportunity) -> bool {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let mut merged = false;
        for slot in [&mut state.selection.selected, &mut state.selection.editing] {
            if slot.as_ref().is_some_and(|o| o.id == revised.id) {
                *slot = Some(revised.clone());
                merged = true;
            }
        }
        if let Some(row) = state.opportunities.iter_mut().find(|o| o.id == revised.id) {
            *row = revised;
            state.revision += 1;
            merged = true;
        }
        merged
    }

    pub async fn assist(&self, id: Uuid, prompt: Option<String>) -> Result<Opportunity, PipelineError> {
        let assistant = self.assistant.clone().ok_or(PipelineError::AssistantUnavailable)?;
        let (opportunity, current_user) = {
            let state = self.state.read().await;
            let opportunity = state.opportunity(id).cloned().ok_or(PipelineError::NotFound(id))?;
            (opportunity, state.current_user.clone())
        };

        let revised = assistant
            .assist(AssistRequest {
                opportunity,
                current_user,
                prompt,
            })
            .await?;
        if revised.id != id {
            return Err(AdapterError::Decode(format!(
                "assistant answered for opportunity {} instead of {id}",
                revised.id
            ))
            .into());
        }
        self.merge_assistant_update(revised.clone()).await;
        Ok(revised)
    }

    pub async fn snapshot(&self) -> PipelineState {
        self.state.read().await.clone()
    }

    pub async fn current_user(&self) -> Option<String> {
        self.state.read().await.current_user.clone()
    }

    pub async fn vendors(&self) -> Vec<Vendor> {
        self.state.read().await.vendors.clone()
    }

    /// Resolved vendors, plus the current user when only the roster marks
    /// them as an admin.
    fn access_list(&self, state: &PipelineState) -> Vec<Vendor> {
        let mut vendors = state.vendors.clone();
        if let Some(user) = state.current_user.as_deref() {
            if self.roster.is_admin(user) && !is_admin(user, &vendors) {
                vendors.push(self.roster.vendor(user));
            }
        }
        vendors
    }

    pub async fn visible_opportunities(&self) -> Vec<Opportunity> {
        let state = self.state.read().await;
        let vendors = self.access_list(&state);
        visible_to(&state.opportunities, state.current_user.as_deref(), &vendors)
    }

    pub async fn filtered(&self, filter: &OpportunityFilter) -> Vec<Opportunity> {
        let visible = self.visible_opportunities().await;
        filter.apply(&visible, self.now())
    }

    pub async fn metrics(&self, vendor: Option<&str>) -> PortfolioMetrics {
        let state = self.state.read().await;
        let vendors = self.access_list(&state);
        let scope = dashboard_scope(
            &state.opportunities,
            state.current_user.as_deref(),
            &vendors,
            vendor,
        );
        PortfolioMetrics::compute(&scope)
    }

    /// Reloads on every store change notification until the feed closes.
    pub fn spawn_change_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut feed = self.store.subscribe();
        let pipeline = Arc::clone(self);
        let task = async move {
            loop {
                match feed.recv().await {
                    Ok(event) => debug!(table = %event.table, kind = ?event.kind, id = ?event.id, "change received"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "change feed lagged"),
                    Err(RecvError::Closed) => {
                        debug!("change feed closed");
                        break;
                    }
                }
                if let Err(err) = pipeline.load_opportunities().await {
                    warn!(error = %err, "reload after change failed");
                }
            }
        };
        tokio::spawn(task.instrument(info_span!("change_listener")))
    }

    /// Periodic full reload, when a resync schedule is configured.
    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> anyhow::Result<Option<JobScheduler>> {
        let Some(cron) = &self.resync_cron else {
            return Ok(None);
        };

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let pipeline = Arc::clone(self);
        let job = Job::new_async(cron, move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.load_opportunities().await {
                    Ok(count) => info!(count, "scheduled resync finished"),
                    Err(err) => warn!(error = %err, "scheduled resync failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

fn refresh_selection(selection: &mut crate::Selection, rows: &[Opportunity]) {
    for slot in [&mut selection.selected, &mut selection.editing] {
        if let Some(tracked) = slot.as_ref() {
            *slot = rows.iter().find(|o| o.id == tracked.id).cloned();
        }
    }
}

fn clear_selection_for(state: &mut PipelineState, id: Uuid) {
    for slot in [&mut state.selection.selected, &mut state.selection.editing] {
        if slot.as_ref().is_some_and(|o| o.id == id) {
            *slot = None;
        }
    }
}
