use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;

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
    ($left:expr, $right:expr, $($arg:tt)*) => {
        if $left != $right {
            return Err(format!($($arg)*));
        }
    };
}

const SEED_SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");
const SCHEMA_SQL: &str = include_str!("../../../migrations/0001_init.up.sql");

fn load_contract() -> SeedContractTestResult<SeedContract> {
    serde_json::from_str(include_str!("../../../config/fixtures/demo_seed_contract.json"))
        .map_err(|error| format!("demo seed contract JSON must parse: {error}"))
}

fn parse_money(field: &str, raw: &str) -> Result<Decimal, String> {
    raw.parse::<Decimal>()
        .map_err(|_| format!("{field} should be a decimal string, got '{raw}'"))
}

#[derive(Debug, Deserialize)]
struct TableContract {
    table: String,
    id_column: String,
    rows: i64,
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ModuleContract {
    module: String,
    description: String,
    tables: Vec<TableContract>,
}

#[derive(Debug, Deserialize)]
struct InvoiceMatrixRow {
    id: String,
    status: String,
    original_value: String,
    paid_value: String,
    balance_value: String,
    settled: bool,
}

#[derive(Debug, Deserialize)]
struct SeedFacts {
    renewal_contract_id: String,
    renewal_days_ahead: u32,
    renewal_window_days: u32,
    accepted_proposal_code: String,
    anchored_contract_number: String,
    received_order_code: String,
    linked_expense_total: String,
    receivable_open_balance: String,
    payable_open_balance: String,
    below_minimum_stock_item: String,
    cac_report_year: i32,
}

#[derive(Debug, Deserialize)]
struct SeedContract {
    dataset_version: String,
    seed_dataset: String,
    id_prefix: String,
    modules: Vec<ModuleContract>,
    invoice_settlement_matrix: Vec<InvoiceMatrixRow>,
    facts: SeedFacts,
}

#[test]
fn seed_contract_matches_the_sql_fixture() -> SeedContractTestResult {
    let contract = load_contract()?;
    let mut modules_seen = HashSet::new();
    let mut ids_seen: HashSet<String> = HashSet::new();

    require_eq!(contract.dataset_version, "2026.08");
    require_eq!(contract.seed_dataset, "opsdesk_demo_company");
    require_eq!(contract.id_prefix, "demo-");

    for module in &contract.modules {
        require!(
            modules_seen.insert(module.module.clone()),
            "duplicate module block: {}",
            module.module
        );
        require!(!module.description.is_empty());
        require!(!module.tables.is_empty(), "module {} lists no tables", module.module);

        for table in &module.tables {
            require!(table.rows > 0, "table {} should seed at least one row", table.table);
            if table.id_column == "id" {
                require_eq!(
                    table.ids.len() as i64,
                    table.rows,
                    "table {} lists {} ids for {} rows",
                    table.table,
                    table.ids.len(),
                    table.rows
                );
            }

            for id in &table.ids {
                require!(
                    id.starts_with(&contract.id_prefix),
                    "id {} in table {} breaks the {} prefix discipline",
                    id,
                    table.table,
                    contract.id_prefix
                );
                require!(
                    ids_seen.insert(id.clone()),
                    "id {} appears in more than one table block",
                    id
                );
                require!(
                    SEED_SQL.contains(&format!("'{id}'")),
                    "seed SQL fixture should insert {} into {}",
                    id,
                    table.table
                );
            }
        }
    }

    for expected_module in [
        "crm",
        "catalog",
        "purchasing",
        "inventory",
        "contracts",
        "finance",
        "operations",
        "marketing",
        "audit",
    ] {
        require!(
            modules_seen.contains(expected_module),
            "missing canonical module block: {expected_module}"
        );
    }
    Ok(())
}

#[test]
fn every_contract_table_exists_in_the_schema() -> SeedContractTestResult {
    let contract = load_contract()?;

    for module in &contract.modules {
        for table in &module.tables {
            require!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE {} (", table.table)),
                "schema is missing table {} referenced by module {}",
                table.table,
                module.module
            );
        }
    }
    Ok(())
}

#[test]
fn cleanup_precedes_the_inserts_and_covers_every_table() -> SeedContractTestResult {
    let contract = load_contract()?;

    let first_insert = SEED_SQL
        .find("INSERT INTO")
        .ok_or_else(|| "seed SQL fixture has no inserts".to_string())?;
    let first_delete = SEED_SQL
        .find("DELETE FROM")
        .ok_or_else(|| "seed SQL fixture has no cleanup block".to_string())?;
    require!(first_delete < first_insert, "cleanup block should precede the inserts");

    for module in &contract.modules {
        for table in &module.tables {
            let delete = format!(
                "DELETE FROM {} WHERE {} LIKE '{}%'",
                table.table, table.id_column, contract.id_prefix
            );
            require!(
                SEED_SQL.contains(&delete),
                "seed SQL fixture should clean table {} before reseeding",
                table.table
            );
            require!(
                SEED_SQL.contains(&format!("INSERT INTO {} (", table.table)),
                "seed SQL fixture should insert into table {}",
                table.table
            );
        }
    }

    // The purchase order and its expense reference each other, so the link
    // must be cleared before the expense rows can go.
    require!(
        SEED_SQL.contains("UPDATE purchase_order SET linked_expense_id = NULL"),
        "seed SQL fixture should clear the expense link before deleting expenses"
    );
    Ok(())
}

#[test]
fn invoice_settlement_matrix_is_consistent() -> SeedContractTestResult {
    let contract = load_contract()?;
    let invoice_ids: HashSet<&str> = contract
        .modules
        .iter()
        .filter(|module| module.module == "finance")
        .flat_map(|module| &module.tables)
        .filter(|table| table.table == "invoice")
        .flat_map(|table| &table.ids)
        .map(String::as_str)
        .collect();

    let mut open_total = Decimal::ZERO;
    let mut settled_rows = 0usize;
    let mut unsettled_rows = 0usize;

    for row in &contract.invoice_settlement_matrix {
        require!(
            invoice_ids.contains(row.id.as_str()),
            "matrix invoice {} is not part of the finance module block",
            row.id
        );
        require!(
            matches!(row.status.as_str(), "open" | "paid" | "partial" | "overdue"),
            "unexpected invoice status {} for {}",
            row.status,
            row.id
        );

        let original = parse_money("original_value", &row.original_value)?;
        let paid = parse_money("paid_value", &row.paid_value)?;
        let balance = parse_money("balance_value", &row.balance_value)?;
        require_eq!(
            balance,
            original - paid,
            "balance of {} should be original minus paid ({} != {} - {})",
            row.id,
            balance,
            original,
            paid
        );

        if row.settled {
            require_eq!(row.status, "paid", "settled invoice {} should be paid", row.id);
            require!(balance.is_zero(), "settled invoice {} should carry no balance", row.id);
            settled_rows += 1;
        } else {
            require!(row.status != "paid", "unsettled invoice {} cannot be paid", row.id);
            require!(!balance.is_zero(), "unsettled invoice {} should carry a balance", row.id);
            open_total += balance;
            unsettled_rows += 1;
        }
        require!(
            SEED_SQL.contains(&format!("'{}'", row.balance_value)),
            "seed SQL fixture should carry the balance {} for {}",
            row.balance_value,
            row.id
        );
    }

    require!(settled_rows >= 1, "matrix should include at least one settled invoice");
    require!(unsettled_rows >= 1, "matrix should include at least one outstanding invoice");

    let receivable =
        parse_money("receivable_open_balance", &contract.facts.receivable_open_balance)?;
    require_eq!(
        open_total,
        receivable,
        "outstanding matrix balances should sum to the receivable fact ({} != {})",
        open_total,
        receivable
    );
    Ok(())
}

#[test]
fn business_facts_align_with_the_fixture() -> SeedContractTestResult {
    let contract = load_contract()?;
    let facts = &contract.facts;

    require_eq!(
        facts.anchored_contract_number,
        format!("CTR-{}", facts.accepted_proposal_code),
        "contract number should anchor on the accepted proposal code"
    );
    require!(
        facts.renewal_days_ahead < facts.renewal_window_days,
        "the seeded renewal ({} days out) should fall inside the alert window ({} days)",
        facts.renewal_days_ahead,
        facts.renewal_window_days
    );
    require!(
        SEED_SQL.contains(&format!("date('now', '+{} days')", facts.renewal_days_ahead)),
        "seed SQL fixture should push the renewal {} days out",
        facts.renewal_days_ahead
    );

    for needle in [
        facts.renewal_contract_id.as_str(),
        facts.anchored_contract_number.as_str(),
        facts.received_order_code.as_str(),
        facts.below_minimum_stock_item.as_str(),
    ] {
        require!(
            SEED_SQL.contains(&format!("'{needle}'")),
            "seed SQL fixture should contain {needle}"
        );
    }

    let linked_total = parse_money("linked_expense_total", &facts.linked_expense_total)?;
    require!(linked_total > Decimal::ZERO);
    require!(
        SEED_SQL.contains(&format!("'{}'", facts.linked_expense_total)),
        "seed SQL fixture should carry the linked expense total"
    );

    let payable = parse_money("payable_open_balance", &facts.payable_open_balance)?;
    require!(payable > Decimal::ZERO);

    require!(facts.cac_report_year >= 2026, "the acquisition report year looks wrong");
    require!(
        SEED_SQL.contains(&format!("{}, 6,", facts.cac_report_year)),
        "seed SQL fixture should carry spend for June of the report year"
    );
    Ok(())
}
