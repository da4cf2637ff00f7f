use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    error::BotResult,
    types::{Chat, Cliente, Mensaje},
};

pub fn chat_id_for(phone: &str) -> String {
    format!("chat_{phone}")
}

/// Messages kept per chat by the in-memory backend; older ones are dropped.
const MEMORY_MESSAGES_PER_CHAT: usize = 200;

#[derive(Default)]
pub struct MemoryStore {
    clientes: Vec<Cliente>,
    chats: HashMap<String, Chat>,
    mensajes: HashMap<String, VecDeque<Mensaje>>,
}

/// Append-only conversation log. Postgres when a database is configured,
/// otherwise a per-chat capped in-process table that is lost on restart.
pub enum Store {
    Postgres(PgPool),
    Memory(Mutex<MemoryStore>),
}

impl Store {
    pub async fn connect(database_url: &str) -> BotResult<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&db).await?;
        info!("postgres connected and migrated");
        Ok(Store::Postgres(db))
    }

    pub fn memory() -> Self {
        Store::Memory(Mutex::new(MemoryStore::default()))
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Store::Postgres(_) => "postgres",
            Store::Memory(_) => "memory",
        }
    }

    /// Finds the client by phone, creating it on first contact. A non-empty
    /// `name` replaces the stored one.
    pub async fn get_or_create_client(&self, phone: &str, name: &str) -> BotResult<Cliente> {
        match self {
            Store::Postgres(db) => {
                let row = sqlx::query(
                    "INSERT INTO cliente (telefono, nombre) VALUES ($1, $2) \
                     ON CONFLICT (telefono) DO UPDATE SET nombre = \
                       CASE WHEN EXCLUDED.nombre <> '' THEN EXCLUDED.nombre ELSE cliente.nombre END \
                     RETURNING id, telefono, nombre",
                )
                .bind(phone)
                .bind(name)
                .fetch_one(db)
                .await?;
                Ok(Cliente {
                    id: row.get("id"),
                    telefono: row.get("telefono"),
                    nombre: row.get("nombre"),
                })
            }
            Store::Memory(mem) => {
                let mut mem = mem.lock().await;
                if let Some(existing) = mem.clientes.iter_mut().find(|c| c.telefono == phone) {
                    if !name.is_empty() {
                        existing.nombre = name.to_string();
                    }
                    return Ok(existing.clone());
                }
                let cliente = Cliente {
                    id: mem.clientes.len() as i64 + 1,
                    telefono: phone.to_string(),
                    nombre: name.to_string(),
                };
                mem.clientes.push(cliente.clone());
                Ok(cliente)
            }
        }
    }

    pub async fn get_or_create_chat(&self, cliente: &Cliente) -> BotResult<Chat> {
        let id_chat = chat_id_for(&cliente.telefono);
        match self {
            Store::Postgres(db) => {
                let row = sqlx::query(
                    "INSERT INTO chat (id_chat, id_cliente, fecha_creacion) VALUES ($1, $2, $3) \
                     ON CONFLICT (id_chat) DO UPDATE SET id_chat = EXCLUDED.id_chat \
                     RETURNING id_chat, id_cliente, fecha_creacion",
                )
                .bind(&id_chat)
                .bind(cliente.id)
                .bind(Utc::now())
                .fetch_one(db)
                .await?;
                Ok(Chat {
                    id_chat: row.get("id_chat"),
                    id_cliente: row.get("id_cliente"),
                    fecha_creacion: row.get::<DateTime<Utc>, _>("fecha_creacion"),
                })
            }
            Store::Memory(mem) => {
                let mut mem = mem.lock().await;
                let chat = mem.chats.entry(id_chat.clone()).or_insert_with(|| Chat {
                    id_chat,
                    id_cliente: cliente.id,
                    fecha_creacion: Utc::now(),
                });
                Ok(chat.clone())
            }
        }
    }

    pub async fn record_message(
        &self,
        id_chat: &str,
        contenido: &str,
        es_cliente: bool,
    ) -> BotResult<Mensaje> {
        let mensaje = Mensaje {
            id_chat: id_chat.to_string(),
            contenido: contenido.to_string(),
            es_cliente,
            fecha_envio: Utc::now(),
        };
        match self {
            Store::Postgres(db) => {
                sqlx::query(
                    "INSERT INTO mensaje (id_chat, contenido, es_cliente, fecha_envio) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(&mensaje.id_chat)
                .bind(&mensaje.contenido)
                .bind(mensaje.es_cliente)
                .bind(mensaje.fecha_envio)
                .execute(db)
                .await?;
            }
            Store::Memory(mem) => {
                let mut mem = mem.lock().await;
                let log = mem.mensajes.entry(mensaje.id_chat.clone()).or_default();
                log.push_back(mensaje.clone());
                if log.len() > MEMORY_MESSAGES_PER_CHAT {
                    log.pop_front();
                }
            }
        }
        Ok(mensaje)
    }

    /// Most recent `limit` messages, oldest first.
    pub async fn last_messages(&self, id_chat: &str, limit: usize) -> BotResult<Vec<Mensaje>> {
        match self {
            Store::Postgres(db) => {
                let rows = sqlx::query(
                    "SELECT id_chat, contenido, es_cliente, fecha_envio FROM mensaje \
                     WHERE id_chat = $1 ORDER BY fecha_envio DESC, id DESC LIMIT $2",
                )
                .bind(id_chat)
                .bind(limit as i64)
                .fetch_all(db)
                .await?;
                let mut messages = rows.into_iter().map(parse_mensaje_row).collect::<Vec<_>>();
                messages.reverse();
                Ok(messages)
            }
            Store::Memory(mem) => {
                let mem = mem.lock().await;
                let Some(log) = mem.mensajes.get(id_chat) else {
                    return Ok(Vec::new());
                };
                let start = log.len().saturating_sub(limit);
                Ok(log.iter().skip(start).cloned().collect())
            }
        }
    }

    pub async fn all_messages(&self, id_chat: &str) -> BotResult<Vec<Mensaje>> {
        match self {
            Store::Postgres(db) => {
                let rows = sqlx::query(
                    "SELECT id_chat, contenido, es_cliente, fecha_envio FROM mensaje \
                     WHERE id_chat = $1 ORDER BY fecha_envio ASC, id ASC",
                )
                .bind(id_chat)
                .fetch_all(db)
                .await?;
                Ok(rows.into_iter().map(parse_mensaje_row).collect())
            }
            Store::Memory(mem) => Ok(mem
                .lock()
                .await
                .mensajes
                .get(id_chat)
                .map(|log| log.iter().cloned().collect())
                .unwrap_or_default()),
        }
    }
}

fn parse_mensaje_row(row: sqlx::postgres::PgRow) -> Mensaje {
    Mensaje {
        id_chat: row.get("id_chat"),
        contenido: row.get("contenido"),
        es_cliente: row.get("es_cliente"),
        fecha_envio: row.get::<DateTime<Utc>, _>("fecha_envio"),
    }
}
