pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod imports;
pub mod money;
pub mod numbering;

pub use domain::catalog::{Product, ProductKind, Service, Supplier};
pub use domain::contracts::{Contract, ContractStatus, RenewalNotice};
pub use domain::crm::{Customer, Opportunity, Proposal, ProposalLine, ProposalStatus};
pub use domain::finance::{Amounts, Expense, ExpenseStatus, Invoice, InvoiceStatus};
pub use domain::inventory::{StockItem, StockMovement};
pub use domain::operations::{Asset, ServiceOrder, ServiceOrderStatus, Ticket, TicketStatus};
pub use domain::purchasing::{
    PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus, Receipt, Requisition, RequisitionStatus,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
