use std::collections::HashSet;

use serde::Deserialize;

use mitsumori_core::domain::approval::ApprovalFlow;

type SeedContractTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

#[derive(Debug, Deserialize)]
struct SeedEstimateContract {
    id: i64,
    estimate_number: String,
    status: String,
    approval_steps: usize,
    current_index: Option<usize>,
    total_amount: i64,
}

#[derive(Debug, Deserialize)]
struct SeedContract {
    dataset_version: String,
    seed_dataset: String,
    estimates: Vec<SeedEstimateContract>,
    product_skus: Vec<String>,
    category_codes: Vec<String>,
    maintenance_fee_ids: Vec<i64>,
}

const FIXTURE_SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

fn load_contract() -> SeedContractTestResult<SeedContract> {
    serde_json::from_str(include_str!("../../../config/fixtures/demo_seed_contract.json"))
        .map_err(|error| format!("seed contract JSON must parse: {error}"))
}

/// Pulls every single-quoted JSON array literal out of the fixture SQL.
fn json_array_literals(sql: &str) -> Vec<&str> {
    sql.split('\'')
        .enumerate()
        .filter(|(index, _)| index % 2 == 1)
        .map(|(_, literal)| literal)
        .filter(|literal| literal.starts_with('['))
        .collect()
}

#[test]
fn seed_contract_matches_demo_seed_sql_fixture() -> SeedContractTestResult {
    let contract = load_contract()?;

    require_eq!(contract.dataset_version.as_str(), "2025-04");
    require_eq!(contract.seed_dataset.as_str(), "deterministic_demo_back_office");
    require_eq!(contract.estimates.len(), 3);

    let mut statuses = HashSet::new();
    for estimate in &contract.estimates {
        require!(statuses.insert(estimate.status.clone()), "duplicate status {}", estimate.status);
        require!(
            FIXTURE_SQL.contains(&format!("'{}'", estimate.estimate_number)),
            "fixture should include estimate number {}",
            estimate.estimate_number
        );
        require!(
            FIXTURE_SQL.contains(&format!("({}, '{}'", estimate.id, estimate.estimate_number)),
            "fixture should bind id {} to {}",
            estimate.id,
            estimate.estimate_number
        );
        require!(
            FIXTURE_SQL.contains(&format!("{}, ", estimate.total_amount)),
            "fixture should carry total {} for {}",
            estimate.total_amount,
            estimate.estimate_number
        );
        require!(estimate.approval_steps > 0 || estimate.current_index.is_none());
    }

    for sku in &contract.product_skus {
        require!(FIXTURE_SQL.contains(&format!("'{sku}'")), "fixture should include sku {sku}");
    }
    for code in &contract.category_codes {
        require!(FIXTURE_SQL.contains(&format!("'{code}'")), "fixture should include code {code}");
    }
    for id in &contract.maintenance_fee_ids {
        require!(FIXTURE_SQL.contains(&format!("({id}, ")), "fixture should include fee {id}");
    }

    Ok(())
}

#[test]
fn seeded_approval_flows_decode_and_match_contract() -> SeedContractTestResult {
    let contract = load_contract()?;
    let flows: Vec<ApprovalFlow> = json_array_literals(FIXTURE_SQL)
        .into_iter()
        .filter(|literal| !literal.contains("\"sku\""))
        .map(|literal| {
            ApprovalFlow::from_json(literal).map_err(|error| format!("flow `{literal}`: {error}"))
        })
        .collect::<Result<_, _>>()?;

    let expected: Vec<&SeedEstimateContract> =
        contract.estimates.iter().filter(|estimate| estimate.approval_steps > 0).collect();
    require_eq!(flows.len(), expected.len());

    for (flow, estimate) in flows.iter().zip(expected) {
        require_eq!(flow.len(), estimate.approval_steps);
        require_eq!(flow.current_index(), estimate.current_index);
        require!(!flow.is_halted(), "seeded flow for {} must not be halted", estimate.estimate_number);
        if estimate.status == "sent" {
            require!(flow.is_fully_approved());
        }
    }

    Ok(())
}
