use concierge_db::{DemoCatalog, SeedResult};

use crate::commands::{open_migrated, prepare, CommandResult, StepFailure};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;

        let run_result: Result<SeedResult, StepFailure> = async {
            let seeded = DemoCatalog::seed(&pool)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
            let verification = DemoCatalog::verify(&pool)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

            if verification.all_present {
                Ok(seeded)
            } else {
                Err(("seed_verification", verification_failure_message(&verification.checks), 6u8))
            }
        }
        .await;

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", seed_summary(seeded)),
        Err(failure) => CommandResult::from_step("seed", failure),
    }
}

fn seed_summary(seeded: SeedResult) -> String {
    format!(
        "demo catalog ready: {} product(s) inserted, {} refreshed",
        seeded.inserted, seeded.refreshed
    )
}

fn verification_failure_message(checks: &[(&'static str, bool)]) -> String {
    let missing =
        checks.iter().filter_map(|(product, present)| (!present).then_some(*product)).collect::<Vec<_>>();
    if missing.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for products: {}", missing.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use concierge_db::SeedResult;

    use super::{seed_summary, verification_failure_message};

    #[test]
    fn verification_error_message_targets_missing_products() {
        let checks = [("prod_001", true), ("prod_004", false), ("prod_009", false)];

        assert_eq!(
            verification_failure_message(&checks),
            "Seed verification failed for products: prod_004, prod_009"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        let checks = [("prod_001", true), ("prod_002", true)];

        assert_eq!(verification_failure_message(&checks), "Some seed data failed to load");
    }

    #[test]
    fn summary_counts_inserted_and_refreshed() {
        let summary = seed_summary(SeedResult { inserted: 3, refreshed: 7 });
        assert_eq!(summary, "demo catalog ready: 3 product(s) inserted, 7 refreshed");
    }
}
