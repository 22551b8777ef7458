use mitsumori_core::config::LoadOptions;
use mitsumori_db::{migrations, DemoSeedDataset, EstimateSeedInfo};
use tracing::info;

use crate::commands::{with_database, CommandResult, EXIT_MIGRATION};

/// Reloads the demo dataset. Previously seeded rows are removed first so repeated runs
/// converge on the same state. With `clean_only` the rows are removed and nothing is loaded.
pub fn run(options: &LoadOptions, clean_only: bool) -> CommandResult {
    let result = with_database("seed", options, |_config, pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;

        DemoSeedDataset::clean(&pool)
            .await
            .map_err(|error| ("seed_clean", error.to_string(), EXIT_MIGRATION))?;
        if clean_only {
            return Ok(None);
        }

        let seeded = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), EXIT_MIGRATION))?;
        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), EXIT_MIGRATION))?;

        if !verification.all_present {
            return Err(("seed_verification", verification_message(&verification.checks), EXIT_MIGRATION));
        }

        info!(
            event_name = "cli.seed.loaded",
            correlation_id = "cli",
            estimates = seeded.estimates_seeded.len(),
            "demo dataset loaded"
        );
        Ok(Some(seeded.estimates_seeded))
    });

    match result {
        Ok(None) => CommandResult::success("seed", "demo dataset removed"),
        Ok(Some(estimates)) => CommandResult::success("seed", loaded_message(&estimates)),
        Err(failure) => failure,
    }
}

fn loaded_message(estimates: &[EstimateSeedInfo]) -> String {
    let lines = estimates
        .iter()
        .map(|estimate| {
            format!("  - {} ({}, id {})", estimate.estimate_number, estimate.status, estimate.id.0)
        })
        .collect::<Vec<_>>();
    format!("demo dataset loaded with {} estimates:\n{}", estimates.len(), lines.join("\n"))
}

fn verification_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use mitsumori_core::{EstimateId, EstimateStatus};
    use mitsumori_db::EstimateSeedInfo;

    use super::{loaded_message, verification_message};

    #[test]
    fn verification_message_names_failed_checks() {
        let checks = [("products", true), ("EST-DEMO-ACME-250402-001", false), ("maintenance-fees", false)];
        assert_eq!(
            verification_message(&checks),
            "seed verification failed for checks: EST-DEMO-ACME-250402-001, maintenance-fees"
        );
    }

    #[test]
    fn verification_message_falls_back_without_labels() {
        assert_eq!(verification_message(&[("products", true)]), "some seed data failed to load");
    }

    #[test]
    fn loaded_message_lists_each_estimate() {
        let message = loaded_message(&[EstimateSeedInfo {
            id: EstimateId(9001),
            estimate_number: "EST-DEMO-ACME-250401-001",
            status: EstimateStatus::Draft,
        }]);
        assert!(message.starts_with("demo dataset loaded with 1 estimates"));
        assert!(message.contains("  - EST-DEMO-ACME-250401-001 (draft, id 9001)"));
    }
}
