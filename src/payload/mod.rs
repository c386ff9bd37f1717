//! Typed views over the three raw Tiny ERP payload shapes.
//!
//! The API wraps everything in a `retorno` envelope and serializes most
//! numbers as strings, so the structs here lean on tolerant deserializers
//! (`de` module) and keep the wire field names via serde renames.

pub mod dates;
mod de;

use serde::Deserialize;
use serde_json::Value;

use crate::reconcile::ReconcileError;

/// One order as returned by `pdv.pedido.obter.php` ("pdv pedido").
#[derive(Debug, Clone, Deserialize)]
pub struct OrderDetail {
    #[serde(deserialize_with = "de::id_string")]
    pub id: String,
    #[serde(deserialize_with = "de::id_string")]
    pub numero: String,
    /// Order date, `DD/MM/YYYY` on the wire; normalized in place.
    pub data: String,
    /// Order-level discount: percentage ("10%") or absolute with comma
    /// decimal ("12,50"). Resolved by `reconcile::discount`.
    #[serde(default)]
    pub desconto: String,
    #[serde(rename = "totalProdutos", deserialize_with = "de::flexible_f64")]
    pub total_produtos: f64,
    #[serde(rename = "totalVenda", deserialize_with = "de::flexible_f64")]
    pub total_venda: f64,
    #[serde(rename = "formaPagamento", default)]
    pub forma_pagamento: String,
    #[serde(default)]
    pub contato: Contato,
    pub itens: Vec<OrderItem>,
    #[serde(default)]
    pub parcelas: Vec<Parcela>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Contato {
    #[serde(default)]
    pub nome: String,
    #[serde(rename = "cpfCnpj", default)]
    pub cpf_cnpj: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub celular: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderItem {
    #[serde(rename = "idProduto", deserialize_with = "de::id_string")]
    pub id_produto: String,
    #[serde(default)]
    pub descricao: String,
    /// Unit price, already net of the item's own intrinsic discount.
    #[serde(deserialize_with = "de::flexible_f64")]
    pub valor: f64,
    #[serde(deserialize_with = "de::flexible_f64")]
    pub quantidade: f64,
    /// Intrinsic discount percentage stated for this item.
    #[serde(default, deserialize_with = "de::flexible_f64_lenient")]
    pub desconto: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Parcela {
    #[serde(rename = "formaPagamento", default)]
    pub forma_pagamento: String,
    #[serde(rename = "dataVencimento", default)]
    pub data_vencimento: String,
    #[serde(default, deserialize_with = "de::flexible_f64_lenient")]
    pub valor: f64,
}

/// Order summary from `pedidos.pesquisa.php`; only used for salesperson
/// attribution and tracking info.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderSearch {
    #[serde(deserialize_with = "de::id_string")]
    pub id: String,
    #[serde(deserialize_with = "de::id_string")]
    pub numero: String,
    #[serde(default)]
    pub data_pedido: String,
    #[serde(default, deserialize_with = "de::opt_id_string")]
    pub id_vendedor: Option<String>,
    #[serde(default)]
    pub nome_vendedor: Option<String>,
    #[serde(default)]
    pub codigo_rastreamento: Option<String>,
    #[serde(default)]
    pub url_rastreamento: Option<String>,
}

/// Product catalog record from `produto.obter.php`.
#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    #[serde(deserialize_with = "de::id_string")]
    pub id: String,
    #[serde(default)]
    pub nome: String,
    #[serde(default, deserialize_with = "de::flexible_f64_lenient")]
    pub preco_custo: f64,
    /// Category path of the form `"Main >> Sub"`.
    #[serde(default)]
    pub categoria: String,
}

fn malformed(payload: &'static str, reason: impl ToString) -> ReconcileError {
    ReconcileError::MalformedPayload {
        payload,
        reason: reason.to_string(),
    }
}

/// Unwrap `{"retorno": {"pedido": ...}}` into a typed order.
///
/// Date fields are normalized (`DD/MM/YYYY` -> ISO) as part of parsing;
/// unparseable dates keep their original text (see `dates`).
pub fn parse_order_detail(raw: &Value) -> Result<OrderDetail, ReconcileError> {
    let pedido = raw
        .pointer("/retorno/pedido")
        .ok_or_else(|| malformed("pdv.pedido", "missing retorno.pedido"))?;
    let mut order: OrderDetail =
        serde_json::from_value(pedido.clone()).map_err(|e| malformed("pdv.pedido", e))?;
    order.data = dates::normalize_date(&order.data);
    for parcela in &mut order.parcelas {
        if !parcela.data_vencimento.is_empty() {
            parcela.data_vencimento = dates::normalize_date(&parcela.data_vencimento);
        }
    }
    Ok(order)
}

/// Unwrap `{"retorno": {"pedidos": [{"pedido": ...}]}}` into the single
/// summary the search endpoint returns for an order number.
pub fn parse_order_search(raw: &Value) -> Result<OrderSearch, ReconcileError> {
    let pedido = raw
        .pointer("/retorno/pedidos/0/pedido")
        .ok_or_else(|| malformed("pedidos.pesquisa", "missing retorno.pedidos[0].pedido"))?;
    let mut search: OrderSearch =
        serde_json::from_value(pedido.clone()).map_err(|e| malformed("pedidos.pesquisa", e))?;
    if !search.data_pedido.is_empty() {
        search.data_pedido = dates::normalize_date(&search.data_pedido);
    }
    Ok(search)
}

/// Unwrap one `{"retorno": {"produto": ...}}` catalog record.
pub fn parse_product(raw: &Value) -> Result<Product, ReconcileError> {
    let produto = raw
        .pointer("/retorno/produto")
        .ok_or_else(|| malformed("produto", "missing retorno.produto"))?;
    serde_json::from_value(produto.clone()).map_err(|e| malformed("produto", e))
}

/// Parse the batch of product payloads fetched for an order's line items.
pub fn parse_products(raw: &[Value]) -> Result<Vec<Product>, ReconcileError> {
    raw.iter().map(parse_product).collect()
}

/// Split a category path on the literal `" >> "` separator.
///
/// Text before the separator is the principal category; text after
/// (trimmed) the secondary. No separator means the whole string is the
/// principal category.
pub fn split_category(raw: &str) -> (String, String) {
    match raw.split_once(" >> ") {
        Some((principal, secondary)) => (principal.trim().to_string(), secondary.trim().to_string()),
        None => (raw.trim().to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_order_detail() -> Value {
        json!({
            "retorno": {
                "status_processamento": "3",
                "pedido": {
                    "id": 712345,
                    "numero": "1042",
                    "data": "05/03/2024",
                    "desconto": "10%",
                    "totalProdutos": "300.00",
                    "totalVenda": "270.00",
                    "formaPagamento": "dinheiro",
                    "contato": {
                        "nome": "Maria Silva",
                        "cpfCnpj": "123.456.789-00",
                        "email": "maria@example.com",
                        "celular": "+55 11 99999-0000"
                    },
                    "itens": [
                        {
                            "idProduto": 501,
                            "descricao": "Azeite Extra Virgem 500ml",
                            "valor": "100.00",
                            "quantidade": "1.00",
                            "desconto": "0.00"
                        },
                        {
                            "idProduto": 502,
                            "descricao": "Queijo Canastra 1kg",
                            "valor": "200.00",
                            "quantidade": "1.00",
                            "desconto": "0.00"
                        }
                    ],
                    "parcelas": [
                        {
                            "formaPagamento": "dinheiro",
                            "dataVencimento": "05/03/2024",
                            "valor": "270.00"
                        }
                    ]
                }
            }
        })
    }

    #[test]
    fn parses_order_detail_and_normalizes_dates() {
        let order = parse_order_detail(&sample_order_detail()).unwrap();
        assert_eq!(order.id, "712345");
        assert_eq!(order.numero, "1042");
        assert_eq!(order.data, "2024-03-05");
        assert_eq!(order.parcelas[0].data_vencimento, "2024-03-05");
        assert_eq!(order.itens.len(), 2);
        assert_eq!(order.itens[0].id_produto, "501");
        assert_eq!(order.itens[0].valor, 100.0);
        assert_eq!(order.total_venda, 270.0);
        assert_eq!(order.contato.nome, "Maria Silva");
    }

    #[test]
    fn missing_itens_is_a_malformed_payload() {
        let raw = json!({
            "retorno": { "pedido": { "id": 1, "numero": "2", "data": "01/01/2024" } }
        });
        let err = parse_order_detail(&raw).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::MalformedPayload { payload: "pdv.pedido", .. }
        ));
    }

    #[test]
    fn missing_envelope_is_a_malformed_payload() {
        let err = parse_order_detail(&json!({"retorno": {}})).unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedPayload { .. }));
    }

    #[test]
    fn parses_order_search_salesperson() {
        let raw = json!({
            "retorno": {
                "pedidos": [
                    {
                        "pedido": {
                            "id": "712345",
                            "numero": "1042",
                            "data_pedido": "05/03/2024",
                            "id_vendedor": 9,
                            "nome_vendedor": "Carlos",
                            "codigo_rastreamento": null,
                            "url_rastreamento": null
                        }
                    }
                ]
            }
        });
        let search = parse_order_search(&raw).unwrap();
        assert_eq!(search.numero, "1042");
        assert_eq!(search.id_vendedor.as_deref(), Some("9"));
        assert_eq!(search.nome_vendedor.as_deref(), Some("Carlos"));
        assert_eq!(search.data_pedido, "2024-03-05");
    }

    #[test]
    fn empty_search_result_is_malformed() {
        let raw = json!({"retorno": {"pedidos": []}});
        assert!(parse_order_search(&raw).is_err());
    }

    #[test]
    fn parses_product_with_string_cost() {
        let raw = json!({
            "retorno": {
                "produto": {
                    "id": "501",
                    "nome": "Azeite Extra Virgem 500ml",
                    "preco_custo": "62.50",
                    "categoria": "Mercearia >> Azeites"
                }
            }
        });
        let product = parse_product(&raw).unwrap();
        assert_eq!(product.id, "501");
        assert_eq!(product.preco_custo, 62.5);
    }

    #[test]
    fn splits_category_on_separator() {
        let (principal, secondary) = split_category("Eletrônicos >> Celulares");
        assert_eq!(principal, "Eletrônicos");
        assert_eq!(secondary, "Celulares");
    }

    #[test]
    fn category_without_separator_has_empty_secondary() {
        let (principal, secondary) = split_category("Eletrônicos");
        assert_eq!(principal, "Eletrônicos");
        assert_eq!(secondary, "");
    }
}
