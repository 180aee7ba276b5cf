use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    domain::{
        error::DomainError,
        models::{
            CommandInput, CommandRecord, ControllerRecord, LogBatch, LogRecord, LogRecordInput,
        },
    },
    storage::{SqliteStore, now_utc},
};

/// Number of replay batches retained per controller.
pub const MAX_LOG_BATCHES: usize = 10;

const COMMANDS_DOCUMENT: &str = "netboot/commands";
const LOGS_DOCUMENT: &str = "netboot/logs";

type CommandsDocument = BTreeMap<String, Vec<CommandRecord>>;
type LogsDocument = BTreeMap<String, Vec<LogBatch>>;

/// Per-controller command queue and replay log.
///
/// Both documents are guarded by one store-wide lock: readers share it,
/// writers hold it exclusively for the whole read-modify-write cycle.
#[derive(Debug, Clone)]
pub struct CommandStore {
    db: SqliteStore,
    lock: Arc<RwLock<()>>,
}

impl CommandStore {
    #[must_use]
    pub fn new(db: SqliteStore) -> Self {
        Self {
            db,
            lock: Arc::new(RwLock::new(())),
        }
    }

    pub async fn commands_list(&self) -> Result<Vec<ControllerRecord>, DomainError> {
        let _guard = self.lock.read().await;
        let commands: CommandsDocument = self.db.load_document(COMMANDS_DOCUMENT).await?;
        let mut logs: LogsDocument = self.db.load_document(LOGS_DOCUMENT).await?;

        Ok(commands
            .into_iter()
            .map(|(controller_id, commands)| {
                let logs = logs.remove(&controller_id).unwrap_or_default();
                ControllerRecord {
                    controller_id,
                    commands,
                    logs,
                }
            })
            .collect())
    }

    /// Inserts or replaces the command keyed by `(module, action)`.
    ///
    /// Returns the version and time now recorded on the command.
    pub async fn command_set(
        &self,
        controller_id: &str,
        command: CommandInput,
        module_version: &str,
    ) -> Result<(String, DateTime<Utc>), DomainError> {
        let _guard = self.lock.write().await;
        let mut document: CommandsDocument = self.db.load_document(COMMANDS_DOCUMENT).await?;
        let commands = document.entry(controller_id.to_owned()).or_default();
        let stored_time = now_utc();

        match commands
            .iter_mut()
            .find(|record| record.matches(&command.module, &command.action))
        {
            Some(record) => {
                record.data = command.data;
                record.module_version = module_version.to_owned();
                record.stored_time = stored_time;
            }
            None => commands.push(CommandRecord {
                module: command.module,
                action: command.action,
                data: command.data,
                module_version: module_version.to_owned(),
                stored_time,
            }),
        }

        self.db.save_document(COMMANDS_DOCUMENT, &document).await?;
        debug!("command stored controller={controller_id}");
        Ok((module_version.to_owned(), stored_time))
    }

    pub async fn command_unset(
        &self,
        controller_id: &str,
        module: &str,
        action: &str,
    ) -> Result<bool, DomainError> {
        let _guard = self.lock.write().await;
        let mut document: CommandsDocument = self.db.load_document(COMMANDS_DOCUMENT).await?;
        let Some(commands) = document.get_mut(controller_id) else {
            return Ok(false);
        };
        let Some(index) = commands
            .iter()
            .position(|record| record.matches(module, action))
        else {
            return Ok(false);
        };

        commands.remove(index);
        self.db.save_document(COMMANDS_DOCUMENT, &document).await?;
        debug!("command removed controller={controller_id} command={module}.{action}");
        Ok(true)
    }

    /// Appends a replay result to `batch_id`.
    ///
    /// Results are only accepted for commands currently queued for the
    /// controller; `None` signals an unknown controller or command.
    pub async fn command_log(
        &self,
        controller_id: &str,
        batch_id: &str,
        record: LogRecordInput,
    ) -> Result<Option<DateTime<Utc>>, DomainError> {
        let _guard = self.lock.write().await;
        let commands: CommandsDocument = self.db.load_document(COMMANDS_DOCUMENT).await?;
        let queued = commands.get(controller_id).is_some_and(|commands| {
            commands
                .iter()
                .any(|command| command.matches(&record.module, &record.action))
        });
        if !queued {
            return Ok(None);
        }

        let mut document: LogsDocument = self.db.load_document(LOGS_DOCUMENT).await?;
        let batches = document.entry(controller_id.to_owned()).or_default();
        let when_stored = now_utc();
        let entry = LogRecord {
            module: record.module,
            action: record.action,
            result: record.result,
            when_stored,
        };

        match batches.iter_mut().find(|batch| batch.batch_id == batch_id) {
            Some(batch) => batch.records.push(entry),
            None => {
                if batches.len() >= MAX_LOG_BATCHES {
                    let evicted = batches.len() + 1 - MAX_LOG_BATCHES;
                    batches.drain(..evicted);
                }
                batches.push(LogBatch {
                    batch_id: batch_id.to_owned(),
                    records: vec![entry],
                });
            }
        }

        self.db.save_document(LOGS_DOCUMENT, &document).await?;
        Ok(Some(when_stored))
    }
}
