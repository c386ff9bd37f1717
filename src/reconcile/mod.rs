//! Payload reconciliation and discount allocation.
//!
//! Pure, synchronous core of the pipeline: takes the three raw ERP
//! payloads already fetched for one order and produces the order-level
//! and line-item-level fact rows. No I/O happens anywhere below this
//! module; each order pass owns its inputs and shares nothing.

pub mod costs;
pub mod discount;
pub mod rows;

use serde_json::Value;
use thiserror::Error;

pub use rows::{assemble, IngestContext, LineItemFact, OrderFact, ReconciledOrder};

/// Errors fatal to one order's reconciliation pass. Anything recoverable
/// (bad dates, unparseable discounts, skipped products under the lenient
/// policy) is logged and absorbed before reaching this type.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("malformed {payload} payload: {reason}")]
    MalformedPayload {
        payload: &'static str,
        reason: String,
    },
    /// An intrinsic discount of 100% leaves the pre-discount price
    /// undefined (division by zero).
    #[error("intrinsic discount of {pct}% has no defined pre-discount price")]
    FullDiscount { pct: f64 },
    #[error("no product record for item {product_id}")]
    MissingProduct { product_id: String },
}

/// How to treat a line item whose product catalog lookup fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingProductPolicy {
    /// Drop the item with a warning; totals cover resolvable items only.
    /// Matches the historical behavior of the pipeline.
    Skip,
    /// Abort the order pass so the cost/profit gap is audit-visible.
    Fail,
}

/// Reconcile one order from its raw JSON payloads.
///
/// This is the single entry point the transform worker calls: parse and
/// normalize the three payload shapes, then assemble the fact rows.
/// Either a complete `ReconciledOrder` comes back or nothing does.
pub fn reconcile_order(
    ctx: &IngestContext,
    pdv_pedido_data: &Value,
    pedidos_pesquisa_data: &Value,
    produto_data: &[Value],
    policy: MissingProductPolicy,
) -> Result<ReconciledOrder, ReconcileError> {
    let order = crate::payload::parse_order_detail(pdv_pedido_data)?;
    let search = crate::payload::parse_order_search(pedidos_pesquisa_data)?;
    let products = crate::payload::parse_products(produto_data)?;
    assemble(ctx, &order, &search, &products, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> IngestContext {
        IngestContext {
            trace_id: "11111111-2222-4333-8444-555555555555".to_string(),
            ingested_at: "2024-03-05T12:00:00Z".to_string(),
            source_id: "webhook".to_string(),
        }
    }

    fn pesquisa(numero: &str) -> Value {
        json!({
            "retorno": {
                "pedidos": [
                    { "pedido": { "id": "712345", "numero": numero, "id_vendedor": "9", "nome_vendedor": "Carlos" } }
                ]
            }
        })
    }

    fn produto(id: u32, custo: &str, categoria: &str) -> Value {
        json!({
            "retorno": {
                "produto": { "id": id, "nome": "p", "preco_custo": custo, "categoria": categoria }
            }
        })
    }

    #[test]
    fn reconciles_raw_payloads_end_to_end() {
        let pdv = json!({
            "retorno": {
                "pedido": {
                    "id": 712345,
                    "numero": "1042",
                    "data": "05/03/2024",
                    "desconto": "10%",
                    "totalProdutos": "300.00",
                    "totalVenda": "270.00",
                    "formaPagamento": "pix",
                    "contato": { "nome": "Maria", "cpfCnpj": "x", "email": "m@x", "celular": "1" },
                    "itens": [
                        { "idProduto": 501, "descricao": "a", "valor": "100.00", "quantidade": "1", "desconto": "0" },
                        { "idProduto": 502, "descricao": "b", "valor": "200.00", "quantidade": "1", "desconto": "0" }
                    ]
                }
            }
        });
        let produtos = vec![
            produto(501, "60.00", "Mercearia >> Azeites"),
            produto(502, "120.00", "Laticínios"),
        ];

        let rec = reconcile_order(
            &ctx(),
            &pdv,
            &pesquisa("1042"),
            &produtos,
            MissingProductPolicy::Skip,
        )
        .unwrap();

        assert_eq!(rec.order.pedido_dia, "2024-03-05");
        assert_eq!(rec.items.len(), 2);
        assert!((rec.order.desconto_pedido - 30.0).abs() < 1e-9);
        assert!((rec.order.valor_lucro - 90.0).abs() < 1e-9);
    }

    #[test]
    fn pdv_without_itens_fails_fast() {
        let pdv = json!({
            "retorno": { "pedido": { "id": 1, "numero": "1042", "data": "05/03/2024" } }
        });
        let err = reconcile_order(
            &ctx(),
            &pdv,
            &pesquisa("1042"),
            &[],
            MissingProductPolicy::Skip,
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedPayload { .. }));
    }
}
