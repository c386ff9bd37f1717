//! Cost and profit reconstruction per line item and per order.
//!
//! Combines catalog cost prices with the discount model to rebuild what
//! each unit cost, what it sold for before and after discounts, and what
//! was earned on it. Order totals preserve the ERP's own invoiced figure
//! rather than recomputing it, so rounding always matches the source.

use std::collections::HashMap;

use tracing::warn;

use super::discount::{
    item_intrinsic_discount, item_pre_discount_value, order_discount, proportional_allocation,
};
use super::{MissingProductPolicy, ReconcileError};
use crate::payload::{split_category, OrderDetail, OrderItem, Product};

/// Order-wide figures every per-item computation depends on.
#[derive(Debug, Clone, Copy)]
pub struct OrderTotals {
    /// Sum of `valor x quantidade` over all line items.
    pub pre_discount_value: f64,
    /// The resolved order-level discount amount.
    pub order_discount: f64,
}

impl OrderTotals {
    pub fn of(order: &OrderDetail) -> Self {
        let pre_discount_value = order
            .itens
            .iter()
            .map(|item| item_pre_discount_value(item.valor, item.quantidade))
            .sum();
        Self {
            pre_discount_value,
            order_discount: order_discount(&order.desconto, order.total_produtos),
        }
    }
}

/// The full per-item cost/discount/profit picture, unit figures and the
/// quantity-multiplied totals.
#[derive(Debug, Clone)]
pub struct ItemBreakdown {
    pub produto_id: String,
    pub produto_nome: String,
    pub categoria_principal: String,
    pub categoria_secundaria: String,
    pub quantidade: f64,
    pub valor_custo_und: f64,
    pub valor_sem_desconto_und: f64,
    pub valor_com_desconto_und: f64,
    pub valor_lucro_und: f64,
    pub desconto_produto_und: f64,
    pub desconto_produto: f64,
    pub desconto_pedido_und: f64,
    pub desconto_pedido: f64,
    pub desconto_total_und: f64,
    pub desconto_total: f64,
    pub total_valor_custo: f64,
    pub total_valor_sem_desconto: f64,
    pub total_valor_faturado: f64,
    pub total_valor_lucro: f64,
}

/// Compute the breakdown for one line item against its catalog record.
pub fn breakdown_item(
    item: &OrderItem,
    product: &Product,
    totals: OrderTotals,
) -> Result<ItemBreakdown, ReconcileError> {
    if item.quantidade <= 0.0 {
        return Err(ReconcileError::MalformedPayload {
            payload: "pdv.pedido",
            reason: format!(
                "item {} has nonpositive quantity {}",
                item.id_produto, item.quantidade
            ),
        });
    }

    let (categoria_principal, categoria_secundaria) = split_category(&product.categoria);

    let valor_custo_und = product.preco_custo;
    let desconto_produto_und = item_intrinsic_discount(item.valor, item.desconto)?;
    let valor_sem_desconto_und = item.valor + desconto_produto_und;
    let desconto_produto = desconto_produto_und * item.quantidade;

    let pre_discount_value = item_pre_discount_value(item.valor, item.quantidade);
    let desconto_pedido = proportional_allocation(
        pre_discount_value,
        totals.pre_discount_value,
        totals.order_discount,
    );
    let desconto_pedido_und = desconto_pedido / item.quantidade;

    let desconto_total_und = desconto_produto_und + desconto_pedido_und;
    let valor_com_desconto_und = valor_sem_desconto_und - desconto_total_und;
    let valor_lucro_und = valor_com_desconto_und - valor_custo_und;

    let total_valor_custo = valor_custo_und * item.quantidade;
    let total_valor_sem_desconto = valor_sem_desconto_und * item.quantidade;
    let total_valor_faturado = valor_com_desconto_und * item.quantidade;

    Ok(ItemBreakdown {
        produto_id: item.id_produto.clone(),
        produto_nome: item.descricao.clone(),
        categoria_principal,
        categoria_secundaria,
        quantidade: item.quantidade,
        valor_custo_und,
        valor_sem_desconto_und,
        valor_com_desconto_und,
        valor_lucro_und,
        desconto_produto_und,
        desconto_produto,
        desconto_pedido_und,
        desconto_pedido,
        desconto_total_und,
        desconto_total: desconto_produto + desconto_pedido,
        total_valor_custo,
        total_valor_sem_desconto,
        total_valor_faturado,
        total_valor_lucro: total_valor_faturado - total_valor_custo,
    })
}

/// Break down every line item whose product resolves.
///
/// Under `MissingProductPolicy::Skip` an unresolvable item is dropped with
/// a warning and contributes nothing to any total; under `::Fail` it
/// aborts the order pass so the gap is audit-visible.
pub fn breakdown_order(
    order: &OrderDetail,
    products: &[Product],
    policy: MissingProductPolicy,
) -> Result<Vec<ItemBreakdown>, ReconcileError> {
    let catalog: HashMap<&str, &Product> =
        products.iter().map(|p| (p.id.as_str(), p)).collect();
    let totals = OrderTotals::of(order);

    let mut breakdowns = Vec::with_capacity(order.itens.len());
    for item in &order.itens {
        match catalog.get(item.id_produto.as_str()) {
            Some(product) => breakdowns.push(breakdown_item(item, product, totals)?),
            None if policy == MissingProductPolicy::Fail => {
                return Err(ReconcileError::MissingProduct {
                    product_id: item.id_produto.clone(),
                });
            }
            None => {
                warn!(
                    target: "reconcile",
                    produto_id = %item.id_produto,
                    pedido = %order.numero,
                    "no product record for line item, excluding it from facts"
                );
            }
        }
    }
    Ok(breakdowns)
}

/// Sum of `preco_custo x quantidade` over the resolvable items.
pub fn total_product_cost(breakdowns: &[ItemBreakdown]) -> f64 {
    breakdowns.iter().map(|b| b.total_valor_custo).sum()
}

/// Order-level pre-intrinsic-discount value: what the resolvable and
/// unresolvable items alike would have sold for with no discounts at all.
pub fn total_value_without_discount(order: &OrderDetail) -> Result<f64, ReconcileError> {
    let mut total = 0.0;
    for item in &order.itens {
        let intrinsic = item_intrinsic_discount(item.valor, item.desconto)?;
        total += (item.valor + intrinsic) * item.quantidade;
    }
    Ok(total)
}
