pub mod decision;
pub mod diff;
pub mod ledger;
pub mod line_item;
pub mod mapping;
pub mod result;

pub use decision::{ImportAction, ImportDecision, LineItemDecision, MergeStrategy};
pub use diff::{DiffCounts, DiffField, DiffType, FieldDiff, InvoiceDiff, InvoiceSummary, LineItemDiff, LineItemSnapshot, VoidedAction};
pub use ledger::{
    Invoice, InvoiceHeader, InvoiceLineItem, InvoiceStatus, NewInvoice, NewLineItem, NewService,
    Service, ServiceUpdate, ServiceUpsert, Subscription, UpsertOutcome, Vendor,
};
pub use line_item::{ParsedInvoice, RawRow, RawTable, StandardLineItem};
pub use mapping::{CanonicalField, ColumnMapping, CsvFormatType, MappingResult, TransformRule, TransformRuleKind};
pub use result::{BatchCounts, BatchResult, EntityCounts, ImportReport, InvoiceError, MergeCounts, MergePreview, MergeResult};
