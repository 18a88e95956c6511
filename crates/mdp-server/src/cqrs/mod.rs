pub use mediator::DefaultAsyncMediator;
use std::sync::Arc;

use crate::etl::RunCoordinator;

pub mod middleware;

pub type AppMediator = DefaultAsyncMediator;

pub fn build_mediator(coordinator: Arc<RunCoordinator>) -> AppMediator {
    DefaultAsyncMediator::builder()
        // Ingestion
        .add_handler({
            let coordinator = coordinator.clone();
            move |cmd| {
                let coordinator = coordinator.clone();
                async move { crate::features::ingestion::commands::start_run::handle(coordinator, cmd).await }
            }
        })
        .add_handler({
            let coordinator = coordinator.clone();
            move |cmd| {
                let coordinator = coordinator.clone();
                async move { crate::features::ingestion::commands::cancel_run::handle(coordinator, cmd).await }
            }
        })
        .add_handler({
            let log = coordinator.log().clone();
            move |query| {
                let log = log.clone();
                async move { crate::features::ingestion::queries::get_status::handle(log, query).await }
            }
        })
        .add_handler({
            let log = coordinator.log().clone();
            move |query| {
                let log = log.clone();
                async move { crate::features::ingestion::queries::list_runs::handle(log, query).await }
            }
        })
        // Sources
        .add_handler({
            let registry = coordinator.registry().clone();
            move |query| {
                let registry = registry.clone();
                async move { crate::features::sources::queries::list::handle(registry, query).await }
            }
        })
        .add_handler({
            let coordinator = coordinator.clone();
            move |query| {
                let coordinator = coordinator.clone();
                async move { crate::features::sources::queries::get::handle(coordinator, query).await }
            }
        })
        .build()
}
