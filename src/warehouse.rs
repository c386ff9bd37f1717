//! Warehouse sink: schema-on-write tables and transactional fact inserts.
//!
//! Both fact tables are append-only; corrections arrive as new rows under
//! a new trace uuid. The insert of one reconciled order is a single
//! transaction so a failed pass never leaves a dangling half-order.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::{info, instrument};

use crate::reconcile::{LineItemFact, OrderFact, ReconciledOrder};

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Insert the order fact and all of its line-item facts atomically.
    async fn insert_order(&self, rec: &ReconciledOrder) -> Result<()>;
    /// Distinct `pedido_id`s currently present (sweep support).
    async fn existing_order_ids(&self) -> Result<HashSet<String>>;
}

#[derive(Clone)]
pub struct PgWarehouse {
    pub pool: PgPool,
    pedidos_table: String,
    itens_table: String,
}

impl PgWarehouse {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        pedidos_table: &str,
        itens_table: &str,
    ) -> Result<Self> {
        let connect_options = PgConnectOptions::from_str(database_url)?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("connecting to warehouse")?;
        info!(target: "warehouse", "connected to warehouse");

        let warehouse = Self {
            pool,
            pedidos_table: pedidos_table.to_string(),
            itens_table: itens_table.to_string(),
        };
        warehouse.ensure_tables().await?;
        Ok(warehouse)
    }

    /// Create both fact tables if absent. Idempotent by construction, so
    /// every worker can run it at startup.
    pub async fn ensure_tables(&self) -> Result<()> {
        let pedidos = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                uuid TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                pedido_dia TEXT,
                pedido_id TEXT NOT NULL,
                pedido_numero TEXT,
                cliente_nome TEXT,
                cliente_cpf TEXT,
                cliente_email TEXT,
                cliente_celular TEXT,
                vendedor_nome TEXT,
                vendedor_id TEXT,
                valor_produtos_custo DOUBLE PRECISION,
                valor_produtos_sem_desconto DOUBLE PRECISION,
                desconto_produtos DOUBLE PRECISION,
                desconto_pedido DOUBLE PRECISION,
                desconto_total DOUBLE PRECISION,
                valor_faturado DOUBLE PRECISION,
                valor_lucro DOUBLE PRECISION,
                forma_pagamento TEXT,
                source_id TEXT,
                processed_timestamp TIMESTAMPTZ NOT NULL
            )",
            self.pedidos_table
        );
        let itens = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                uuid TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                pedido_dia TEXT,
                pedido_id TEXT NOT NULL,
                pedido_numero TEXT,
                cliente_nome TEXT,
                cliente_cpf TEXT,
                cliente_email TEXT,
                cliente_celular TEXT,
                vendedor_nome TEXT,
                vendedor_id TEXT,
                produto_id TEXT NOT NULL,
                produto_nome TEXT,
                produto_categoria_principal TEXT,
                produto_categoria_secundaria TEXT,
                produto_valor_custo_und DOUBLE PRECISION,
                produto_valor_sem_desconto_und DOUBLE PRECISION,
                produto_valor_com_desconto_und DOUBLE PRECISION,
                produto_valor_lucro_und DOUBLE PRECISION,
                desconto_produto_und DOUBLE PRECISION,
                desconto_pedido_und DOUBLE PRECISION,
                desconto_total_und DOUBLE PRECISION,
                produto_quantidade DOUBLE PRECISION,
                desconto_produto DOUBLE PRECISION,
                desconto_pedido DOUBLE PRECISION,
                desconto_total DOUBLE PRECISION,
                total_produto_valor_custo DOUBLE PRECISION,
                total_produto_valor_sem_desconto DOUBLE PRECISION,
                total_produto_valor_faturado DOUBLE PRECISION,
                total_produto_valor_lucro DOUBLE PRECISION,
                forma_pagamento TEXT,
                source_id TEXT,
                processed_timestamp TIMESTAMPTZ NOT NULL
            )",
            self.itens_table
        );
        sqlx::query(&pedidos).execute(&self.pool).await?;
        sqlx::query(&itens).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_order_fact<'e>(
        &self,
        tx: &mut sqlx::Transaction<'e, sqlx::Postgres>,
        fact: &OrderFact,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (
                uuid, timestamp, pedido_dia, pedido_id, pedido_numero,
                cliente_nome, cliente_cpf, cliente_email, cliente_celular,
                vendedor_nome, vendedor_id,
                valor_produtos_custo, valor_produtos_sem_desconto,
                desconto_produtos, desconto_pedido, desconto_total,
                valor_faturado, valor_lucro, forma_pagamento,
                source_id, processed_timestamp
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21)",
            self.pedidos_table
        );
        sqlx::query(&sql)
            .bind(&fact.uuid)
            .bind(&fact.timestamp)
            .bind(&fact.pedido_dia)
            .bind(&fact.pedido_id)
            .bind(&fact.pedido_numero)
            .bind(&fact.cliente_nome)
            .bind(&fact.cliente_cpf)
            .bind(&fact.cliente_email)
            .bind(&fact.cliente_celular)
            .bind(&fact.vendedor_nome)
            .bind(&fact.vendedor_id)
            .bind(fact.valor_produtos_custo)
            .bind(fact.valor_produtos_sem_desconto)
            .bind(fact.desconto_produtos)
            .bind(fact.desconto_pedido)
            .bind(fact.desconto_total)
            .bind(fact.valor_faturado)
            .bind(fact.valor_lucro)
            .bind(&fact.forma_pagamento)
            .bind(&fact.source_id)
            .bind(fact.processed_timestamp)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn insert_item_fact<'e>(
        &self,
        tx: &mut sqlx::Transaction<'e, sqlx::Postgres>,
        fact: &LineItemFact,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (
                uuid, timestamp, pedido_dia, pedido_id, pedido_numero,
                cliente_nome, cliente_cpf, cliente_email, cliente_celular,
                vendedor_nome, vendedor_id,
                produto_id, produto_nome,
                produto_categoria_principal, produto_categoria_secundaria,
                produto_valor_custo_und, produto_valor_sem_desconto_und,
                produto_valor_com_desconto_und, produto_valor_lucro_und,
                desconto_produto_und, desconto_pedido_und, desconto_total_und,
                produto_quantidade, desconto_produto, desconto_pedido, desconto_total,
                total_produto_valor_custo, total_produto_valor_sem_desconto,
                total_produto_valor_faturado, total_produto_valor_lucro,
                forma_pagamento, source_id, processed_timestamp
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,
                      $19,$20,$21,$22,$23,$24,$25,$26,$27,$28,$29,$30,$31,$32,$33)",
            self.itens_table
        );
        sqlx::query(&sql)
            .bind(&fact.uuid)
            .bind(&fact.timestamp)
            .bind(&fact.pedido_dia)
            .bind(&fact.pedido_id)
            .bind(&fact.pedido_numero)
            .bind(&fact.cliente_nome)
            .bind(&fact.cliente_cpf)
            .bind(&fact.cliente_email)
            .bind(&fact.cliente_celular)
            .bind(&fact.vendedor_nome)
            .bind(&fact.vendedor_id)
            .bind(&fact.produto_id)
            .bind(&fact.produto_nome)
            .bind(&fact.produto_categoria_principal)
            .bind(&fact.produto_categoria_secundaria)
            .bind(fact.produto_valor_custo_und)
            .bind(fact.produto_valor_sem_desconto_und)
            .bind(fact.produto_valor_com_desconto_und)
            .bind(fact.produto_valor_lucro_und)
            .bind(fact.desconto_produto_und)
            .bind(fact.desconto_pedido_und)
            .bind(fact.desconto_total_und)
            .bind(fact.produto_quantidade)
            .bind(fact.desconto_produto)
            .bind(fact.desconto_pedido)
            .bind(fact.desconto_total)
            .bind(fact.total_produto_valor_custo)
            .bind(fact.total_produto_valor_sem_desconto)
            .bind(fact.total_produto_valor_faturado)
            .bind(fact.total_produto_valor_lucro)
            .bind(&fact.forma_pagamento)
            .bind(&fact.source_id)
            .bind(fact.processed_timestamp)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn insert_order(&self, rec: &ReconciledOrder) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.insert_order_fact(&mut tx, &rec.order).await?;
        for item in &rec.items {
            self.insert_item_fact(&mut tx, item).await?;
        }
        tx.commit().await?;
        info!(
            target: "warehouse",
            pedido = %rec.order.pedido_numero,
            uuid = %rec.order.uuid,
            itens = rec.items.len(),
            "inserted fact rows"
        );
        Ok(())
    }

    async fn existing_order_ids(&self) -> Result<HashSet<String>> {
        let sql = format!("SELECT DISTINCT pedido_id FROM {}", self.pedidos_table);
        let ids: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(ids.into_iter().collect())
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemoryWarehouse {
    pub orders: Mutex<Vec<ReconciledOrder>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn insert_order(&self, rec: &ReconciledOrder) -> Result<()> {
        self.orders.lock().unwrap().push(rec.clone());
        Ok(())
    }

    async fn existing_order_ids(&self) -> Result<HashSet<String>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .map(|rec| rec.order.pedido_id.clone())
            .collect())
    }
}
