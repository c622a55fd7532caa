//! Invoice lookups, listings and payment on behalf of an authenticated caller.

use model::entities::invoice;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use tracing::{debug, instrument};

use crate::error::{ComputeError, Result};
use crate::invoice::InvoiceGenerator;
use crate::page::{Page, Paged};
use crate::policy::{authorize, Action, Caller, ListScope};
use crate::rates::round_amount;

#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub paid: Option<bool>,
    /// Ignored for owner-scoped listings.
    pub user_id: Option<i32>,
}

/// Counts and amounts of the invoices visible in one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceSummary {
    pub total_invoices: u64,
    pub paid_invoices: u64,
    pub pending_invoices: u64,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub pending_amount: Decimal,
}

impl InvoiceSummary {
    fn add(&mut self, invoice: &invoice::Model) {
        self.total_invoices += 1;
        self.total_amount += invoice.amount;
        if invoice.paid {
            self.paid_invoices += 1;
            self.paid_amount += invoice.amount;
        } else {
            self.pending_invoices += 1;
            self.pending_amount += invoice.amount;
        }
    }

    fn rounded(self) -> Self {
        Self {
            total_amount: round_amount(self.total_amount),
            paid_amount: round_amount(self.paid_amount),
            pending_amount: round_amount(self.pending_amount),
            ..self
        }
    }
}

fn scoped(scope: ListScope) -> sea_orm::Select<invoice::Entity> {
    match scope {
        ListScope::Owner(owner_id) => {
            invoice::Entity::find().filter(invoice::Column::UserId.eq(owner_id))
        }
        ListScope::All => invoice::Entity::find(),
    }
}

async fn load_invoice<C: ConnectionTrait>(db: &C, id: i32) -> Result<invoice::Model> {
    invoice::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| ComputeError::not_found(format!("Invoice {}", id)))
}

#[instrument(skip(db))]
pub async fn get_invoice<C: ConnectionTrait>(
    db: &C,
    caller: &Caller,
    id: i32,
) -> Result<invoice::Model> {
    let invoice = load_invoice(db, id).await?;
    authorize(
        caller,
        Action::ViewResource {
            owner_id: invoice.user_id,
        },
    )
    .into_result()?;
    Ok(invoice)
}

/// Invoices in `scope`, newest issue date first.
#[instrument(skip(db))]
pub async fn list_invoices<C: ConnectionTrait>(
    db: &C,
    scope: ListScope,
    filter: InvoiceFilter,
    page: Page,
) -> Result<Paged<invoice::Model>> {
    let mut query = scoped(scope);

    if let (ListScope::All, Some(user_id)) = (scope, filter.user_id) {
        query = query.filter(invoice::Column::UserId.eq(user_id));
    }
    if let Some(paid) = filter.paid {
        query = query.filter(invoice::Column::Paid.eq(paid));
    }

    let paginator = query
        .order_by_desc(invoice::Column::IssueDate)
        .order_by_desc(invoice::Column::Id)
        .paginate(db, page.limit);
    let total = paginator.num_items().await?;
    let items = paginator.fetch_page(page.index()).await?;

    debug!("Listed {} of {} invoices", items.len(), total);
    Ok(Paged { items, total, page })
}

/// Pays an invoice owned by the caller, or any invoice for staff.
#[instrument(skip(db, generator))]
pub async fn pay_invoice<C: ConnectionTrait>(
    db: &C,
    generator: &InvoiceGenerator,
    caller: &Caller,
    id: i32,
) -> Result<invoice::Model> {
    let invoice = load_invoice(db, id).await?;
    authorize(
        caller,
        Action::MarkPaid {
            owner_id: invoice.user_id,
            already_paid: invoice.paid,
        },
    )
    .into_result()?;

    generator.mark_paid(db, id).await
}

#[instrument(skip(db))]
pub async fn invoice_summary<C: ConnectionTrait>(db: &C, scope: ListScope) -> Result<InvoiceSummary> {
    let invoices = scoped(scope).all(db).await?;

    let summary = invoices
        .iter()
        .fold(InvoiceSummary::default(), |mut summary, invoice| {
            summary.add(invoice);
            summary
        })
        .rounded();

    debug!(
        total = summary.total_invoices,
        paid = summary.paid_invoices,
        "Computed invoice summary"
    );
    Ok(summary)
}
