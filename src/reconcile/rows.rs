//! Assembly of the two flat fact rows handed to the warehouse sink.
//!
//! Joins the order detail, the search summary (salesperson attribution)
//! and the product catalog lookups into one `OrderFact` plus one
//! `LineItemFact` per resolvable item. Assembly is all-or-nothing: any
//! error yields no rows at all.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::costs::{breakdown_order, total_product_cost, total_value_without_discount, OrderTotals};
use super::{MissingProductPolicy, ReconcileError};
use crate::payload::{OrderDetail, OrderSearch, Product};

/// Provenance stamped into every fact row of one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestContext {
    /// Correlation id tying raw payloads and fact rows together.
    pub trace_id: String,
    /// ISO-8601 ingestion timestamp supplied by the caller.
    pub ingested_at: String,
    /// Static tag identifying the pipeline deployment.
    pub source_id: String,
}

/// One row of the `pedidos` fact table.
#[derive(Debug, Clone, Serialize)]
pub struct OrderFact {
    pub uuid: String,
    pub timestamp: String,
    pub pedido_dia: String,
    pub pedido_id: String,
    pub pedido_numero: String,
    pub cliente_nome: String,
    pub cliente_cpf: String,
    pub cliente_email: String,
    pub cliente_celular: String,
    pub vendedor_nome: String,
    pub vendedor_id: String,
    pub valor_produtos_custo: f64,
    pub valor_produtos_sem_desconto: f64,
    pub desconto_produtos: f64,
    pub desconto_pedido: f64,
    pub desconto_total: f64,
    pub valor_faturado: f64,
    pub valor_lucro: f64,
    pub forma_pagamento: String,
    pub source_id: String,
    pub processed_timestamp: DateTime<Utc>,
}

/// One row of the `itens_pedido` fact table, keyed by (uuid, produto_id).
#[derive(Debug, Clone, Serialize)]
pub struct LineItemFact {
    pub uuid: String,
    pub timestamp: String,
    pub pedido_dia: String,
    pub pedido_id: String,
    pub pedido_numero: String,
    pub cliente_nome: String,
    pub cliente_cpf: String,
    pub cliente_email: String,
    pub cliente_celular: String,
    pub vendedor_nome: String,
    pub vendedor_id: String,
    pub produto_id: String,
    pub produto_nome: String,
    pub produto_categoria_principal: String,
    pub produto_categoria_secundaria: String,
    pub produto_valor_custo_und: f64,
    pub produto_valor_sem_desconto_und: f64,
    pub produto_valor_com_desconto_und: f64,
    pub produto_valor_lucro_und: f64,
    pub desconto_produto_und: f64,
    pub desconto_pedido_und: f64,
    pub desconto_total_und: f64,
    pub produto_quantidade: f64,
    pub desconto_produto: f64,
    pub desconto_pedido: f64,
    pub desconto_total: f64,
    pub total_produto_valor_custo: f64,
    pub total_produto_valor_sem_desconto: f64,
    pub total_produto_valor_faturado: f64,
    pub total_produto_valor_lucro: f64,
    pub forma_pagamento: String,
    pub source_id: String,
    pub processed_timestamp: DateTime<Utc>,
}

/// The atomic unit handed to the sink: either both shapes land or neither.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciledOrder {
    pub order: OrderFact,
    pub items: Vec<LineItemFact>,
}

/// Join the three payloads into the two fact shapes.
///
/// `processed_timestamp` is captured here, once, so the stamp measures
/// assembly time rather than some earlier clock read.
pub fn assemble(
    ctx: &IngestContext,
    order: &OrderDetail,
    search: &OrderSearch,
    products: &[Product],
    policy: MissingProductPolicy,
) -> Result<ReconciledOrder, ReconcileError> {
    if search.numero != order.numero {
        return Err(ReconcileError::MalformedPayload {
            payload: "pedidos.pesquisa",
            reason: format!(
                "search result is for order {}, expected {}",
                search.numero, order.numero
            ),
        });
    }

    let breakdowns = breakdown_order(order, products, policy)?;
    let totals = OrderTotals::of(order);

    let valor_produtos_custo = total_product_cost(&breakdowns);
    let valor_produtos_sem_desconto = total_value_without_discount(order)?;
    let desconto_produtos: f64 = breakdowns.iter().map(|b| b.desconto_produto).sum();
    let desconto_total = desconto_produtos + totals.order_discount;
    let valor_faturado = order.total_venda;

    let vendedor_nome = search.nome_vendedor.clone().unwrap_or_default();
    let vendedor_id = search.id_vendedor.clone().unwrap_or_default();

    let processed_timestamp = Utc::now();

    let order_fact = OrderFact {
        uuid: ctx.trace_id.clone(),
        timestamp: ctx.ingested_at.clone(),
        pedido_dia: order.data.clone(),
        pedido_id: order.id.clone(),
        pedido_numero: order.numero.clone(),
        cliente_nome: order.contato.nome.clone(),
        cliente_cpf: order.contato.cpf_cnpj.clone(),
        cliente_email: order.contato.email.clone(),
        cliente_celular: order.contato.celular.clone(),
        vendedor_nome: vendedor_nome.clone(),
        vendedor_id: vendedor_id.clone(),
        valor_produtos_custo,
        valor_produtos_sem_desconto,
        desconto_produtos,
        desconto_pedido: totals.order_discount,
        desconto_total,
        valor_faturado,
        valor_lucro: valor_faturado - valor_produtos_custo,
        forma_pagamento: order.forma_pagamento.clone(),
        source_id: ctx.source_id.clone(),
        processed_timestamp,
    };

    let items = breakdowns
        .into_iter()
        .map(|b| LineItemFact {
            uuid: ctx.trace_id.clone(),
            timestamp: ctx.ingested_at.clone(),
            pedido_dia: order.data.clone(),
            pedido_id: order.id.clone(),
            pedido_numero: order.numero.clone(),
            cliente_nome: order.contato.nome.clone(),
            cliente_cpf: order.contato.cpf_cnpj.clone(),
            cliente_email: order.contato.email.clone(),
            cliente_celular: order.contato.celular.clone(),
            vendedor_nome: vendedor_nome.clone(),
            vendedor_id: vendedor_id.clone(),
            produto_id: b.produto_id,
            produto_nome: b.produto_nome,
            produto_categoria_principal: b.categoria_principal,
            produto_categoria_secundaria: b.categoria_secundaria,
            produto_valor_custo_und: b.valor_custo_und,
            produto_valor_sem_desconto_und: b.valor_sem_desconto_und,
            produto_valor_com_desconto_und: b.valor_com_desconto_und,
            produto_valor_lucro_und: b.valor_lucro_und,
            desconto_produto_und: b.desconto_produto_und,
            desconto_pedido_und: b.desconto_pedido_und,
            desconto_total_und: b.desconto_total_und,
            produto_quantidade: b.quantidade,
            desconto_produto: b.desconto_produto,
            desconto_pedido: b.desconto_pedido,
            desconto_total: b.desconto_total,
            total_produto_valor_custo: b.total_valor_custo,
            total_produto_valor_sem_desconto: b.total_valor_sem_desconto,
            total_produto_valor_faturado: b.total_valor_faturado,
            total_produto_valor_lucro: b.total_valor_lucro,
            forma_pagamento: order.forma_pagamento.clone(),
            source_id: ctx.source_id.clone(),
            processed_timestamp,
        })
        .collect();

    Ok(ReconciledOrder {
        order: order_fact,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Contato, OrderItem};

    fn ctx() -> IngestContext {
        IngestContext {
            trace_id: "f2b9c3c4-0000-4000-8000-000000000001".to_string(),
            ingested_at: "2024-03-05T12:00:00Z".to_string(),
            source_id: "webhook".to_string(),
        }
    }

    fn two_item_order() -> OrderDetail {
        OrderDetail {
            id: "712345".to_string(),
            numero: "1042".to_string(),
            data: "2024-03-05".to_string(),
            desconto: "10%".to_string(),
            total_produtos: 300.0,
            total_venda: 270.0,
            forma_pagamento: "dinheiro".to_string(),
            contato: Contato {
                nome: "Maria Silva".to_string(),
                cpf_cnpj: "123.456.789-00".to_string(),
                email: "maria@example.com".to_string(),
                celular: "+55 11 99999-0000".to_string(),
            },
            itens: vec![
                OrderItem {
                    id_produto: "501".to_string(),
                    descricao: "Azeite".to_string(),
                    valor: 100.0,
                    quantidade: 1.0,
                    desconto: 0.0,
                },
                OrderItem {
                    id_produto: "502".to_string(),
                    descricao: "Queijo".to_string(),
                    valor: 200.0,
                    quantidade: 1.0,
                    desconto: 0.0,
                },
            ],
            parcelas: vec![],
        }
    }

    fn search_for(numero: &str) -> OrderSearch {
        OrderSearch {
            id: "712345".to_string(),
            numero: numero.to_string(),
            data_pedido: "2024-03-05".to_string(),
            id_vendedor: Some("9".to_string()),
            nome_vendedor: Some("Carlos".to_string()),
            codigo_rastreamento: None,
            url_rastreamento: None,
        }
    }

    fn products() -> Vec<Product> {
        vec![
            Product {
                id: "501".to_string(),
                nome: "Azeite".to_string(),
                preco_custo: 60.0,
                categoria: "Mercearia >> Azeites".to_string(),
            },
            Product {
                id: "502".to_string(),
                nome: "Queijo".to_string(),
                preco_custo: 120.0,
                categoria: "Laticínios >> Queijos".to_string(),
            },
        ]
    }

    #[test]
    fn end_to_end_two_item_order() {
        let rec = assemble(
            &ctx(),
            &two_item_order(),
            &search_for("1042"),
            &products(),
            MissingProductPolicy::Skip,
        )
        .unwrap();

        let order = &rec.order;
        assert_eq!(order.uuid, ctx().trace_id);
        assert_eq!(order.pedido_numero, "1042");
        assert_eq!(order.vendedor_nome, "Carlos");
        assert!((order.desconto_pedido - 30.0).abs() < 1e-9);
        assert!((order.desconto_produtos - 0.0).abs() < 1e-9);
        assert!((order.desconto_total - 30.0).abs() < 1e-9);
        assert!((order.valor_produtos_custo - 180.0).abs() < 1e-9);
        assert!((order.valor_produtos_sem_desconto - 300.0).abs() < 1e-9);
        assert_eq!(order.valor_faturado, 270.0);
        assert!((order.valor_lucro - 90.0).abs() < 1e-9);

        assert_eq!(rec.items.len(), 2);
        assert!((rec.items[0].desconto_pedido - 10.0).abs() < 1e-9);
        assert!((rec.items[1].desconto_pedido - 20.0).abs() < 1e-9);
        assert!((rec.items[0].produto_valor_lucro_und - 30.0).abs() < 1e-9);
        assert!((rec.items[1].produto_valor_lucro_und - 60.0).abs() < 1e-9);
        assert_eq!(rec.items[0].produto_categoria_principal, "Mercearia");
        assert_eq!(rec.items[1].produto_categoria_secundaria, "Queijos");

        // Both shapes carry the same freshly captured processing stamp.
        assert_eq!(
            rec.items[0].processed_timestamp,
            order.processed_timestamp
        );
    }

    #[test]
    fn mismatched_order_numbers_abort() {
        let err = assemble(
            &ctx(),
            &two_item_order(),
            &search_for("9999"),
            &products(),
            MissingProductPolicy::Skip,
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedPayload { .. }));
    }

    #[test]
    fn missing_product_drops_item_but_keeps_order() {
        let mut products = products();
        products.pop();
        let rec = assemble(
            &ctx(),
            &two_item_order(),
            &search_for("1042"),
            &products,
            MissingProductPolicy::Skip,
        )
        .unwrap();
        assert_eq!(rec.items.len(), 1);
        assert_eq!(rec.items[0].produto_id, "501");
        assert!((rec.order.valor_produtos_custo - 60.0).abs() < 1e-9);
    }

    #[test]
    fn fatal_item_error_produces_no_rows_at_all() {
        let mut order = two_item_order();
        order.itens[1].desconto = 100.0;
        let result = assemble(
            &ctx(),
            &order,
            &search_for("1042"),
            &products(),
            MissingProductPolicy::Skip,
        );
        assert!(result.is_err());
    }
}
