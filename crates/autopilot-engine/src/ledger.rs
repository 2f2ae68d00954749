//! Ledger arithmetic for the two returns
//!
//! Pure functions over read-only snapshots.

use autopilot_core::{LedgerRow, LedgerSnapshot, ReturnBFigures, RowAmounts, TaxSplit};

/// Rows split by whether the counterparty carries a tax-ID
#[derive(Debug, Default)]
pub struct Partition<'a> {
    /// Entered one at a time
    pub grouped: Vec<&'a LedgerRow>,
    /// Summed into one entry
    pub aggregate: Vec<&'a LedgerRow>,
}

impl Partition<'_> {
    /// Sum of the aggregate rows, `None` when there are none
    pub fn aggregate_totals(&self) -> Option<RowAmounts> {
        if self.aggregate.is_empty() {
            return None;
        }
        Some(
            self.aggregate
                .iter()
                .fold(RowAmounts::default(), |acc, row| acc + *row.amounts()),
        )
    }
}

pub fn partition(snapshot: &LedgerSnapshot) -> Partition<'_> {
    let (grouped, aggregate) = snapshot
        .rows
        .iter()
        .partition(|row| matches!(row, LedgerRow::WithCounterpartyId { .. }));
    Partition { grouped, aggregate }
}

/// Components as entered on the portal: an all-domestic total is split
/// evenly, anything with an interstate part is entered per component.
pub fn entered_split(totals: TaxSplit) -> TaxSplit {
    if totals.igst == 0.0 {
        TaxSplit::domestic(totals.total())
    } else {
        totals
    }
}

pub fn net_payable(collected: f64, available: f64) -> f64 {
    (collected - available).max(0.0)
}

/// Figures for the summary return, from sales and purchase snapshots
pub fn return_b_figures(invoices: &LedgerSnapshot, expenses: &LedgerSnapshot) -> ReturnBFigures {
    let collected = invoices.tax_totals();
    let available = expenses.tax_totals();
    ReturnBFigures {
        taxable_sales: invoices.taxable_total(),
        liability: entered_split(collected),
        credit: entered_split(available),
        net_payable: net_payable(collected.total(), available.total()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::LedgerRecord;

    fn rec(gstin: &str, taxable: f64, igst: f64, cgst: f64, sgst: f64) -> LedgerRecord {
        LedgerRecord {
            document_no: format!("INV-{}", taxable),
            gstin: Some(gstin.to_string()),
            taxable_value: taxable,
            igst,
            cgst,
            sgst,
            total: taxable + igst + cgst + sgst,
            ..Default::default()
        }
    }

    #[test]
    fn test_partition_is_complete() {
        let snapshot = LedgerSnapshot::from_records(vec![
            rec("29ABCDE1234F1Z5", 1000.0, 0.0, 90.0, 90.0),
            rec("", 200.0, 0.0, 18.0, 18.0),
            rec("  ", 300.0, 54.0, 0.0, 0.0),
            rec("07AAACB2230M1ZV", 50.0, 9.0, 0.0, 0.0),
        ]);

        let parts = partition(&snapshot);
        assert_eq!(parts.grouped.len() + parts.aggregate.len(), snapshot.len());
        assert_eq!(parts.grouped.len(), 2);
        assert!(parts.grouped.iter().all(|r| r.counterparty_id().is_some()));
        assert!(parts.aggregate.iter().all(|r| r.counterparty_id().is_none()));
    }

    #[test]
    fn test_aggregate_sums_ungrouped_rows() {
        let snapshot = LedgerSnapshot::from_records(vec![
            rec("29ABCDE1234F1Z5", 1000.0, 0.0, 90.0, 90.0),
            rec("", 200.0, 0.0, 18.0, 18.0),
            rec("", 300.0, 54.0, 0.0, 0.0),
        ]);

        let totals = partition(&snapshot).aggregate_totals().unwrap();
        assert_eq!(totals.taxable_value, 500.0);
        assert_eq!(totals.taxes, TaxSplit::new(54.0, 18.0, 18.0));
    }

    #[test]
    fn test_no_aggregate_rows_means_no_entry() {
        let snapshot = LedgerSnapshot::from_records(vec![rec("29ABCDE1234F1Z5", 10.0, 0.0, 0.9, 0.9)]);
        assert!(partition(&snapshot).aggregate_totals().is_none());
    }

    #[test]
    fn test_net_payable_never_negative() {
        assert_eq!(net_payable(100.0, 40.0), 60.0);
        assert_eq!(net_payable(40.0, 100.0), 0.0);
        assert_eq!(net_payable(0.0, 0.0), 0.0);
        for (c, a) in [(0.0, 1.0), (1e9, 1e9 + 0.01), (5.5, 5.5)] {
            assert!(net_payable(c, a) >= 0.0);
        }
    }

    #[test]
    fn test_entered_split() {
        assert_eq!(entered_split(TaxSplit::new(0.0, 30.0, 50.0)), TaxSplit::new(0.0, 40.0, 40.0));
        assert_eq!(entered_split(TaxSplit::new(18.0, 9.0, 9.0)), TaxSplit::new(18.0, 9.0, 9.0));
    }

    #[test]
    fn test_return_b_figures() {
        let invoices = LedgerSnapshot::from_records(vec![
            rec("29ABCDE1234F1Z5", 1000.0, 0.0, 90.0, 90.0),
            rec("", 500.0, 0.0, 45.0, 45.0),
        ]);
        let expenses = LedgerSnapshot::from_records(vec![rec("", 400.0, 72.0, 0.0, 0.0)]);

        let figures = return_b_figures(&invoices, &expenses);
        assert_eq!(figures.taxable_sales, 1500.0);
        assert_eq!(figures.liability, TaxSplit::new(0.0, 135.0, 135.0));
        assert_eq!(figures.credit, TaxSplit::new(72.0, 0.0, 0.0));
        assert_eq!(figures.net_payable, 198.0);
    }
}
