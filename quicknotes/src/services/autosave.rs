//! Debounced auto-save
//!
//! Every edit restarts the note's timer; content is written once the
//! editor has been quiet for the debounce period.

use crate::services::NotesService;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct PendingSave {
    generation: u64,
    content: String,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct AutoSaver {
    notes: NotesService,
    debounce: Duration,
    pending: Arc<Mutex<HashMap<i64, PendingSave>>>,
    generation: Arc<AtomicU64>,
}

impl AutoSaver {
    pub fn new(notes: NotesService, debounce: Duration) -> Self {
        Self {
            notes,
            debounce,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record an edit to an existing note and restart its timer
    pub async fn schedule(&self, note_id: i64, content: String) {
        let mut pending = self.pending.lock().await;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let task = {
            let saver = self.clone();
            let debounce = self.debounce;
            tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                saver.fire(note_id, generation).await;
            })
        };

        if let Some(previous) = pending.insert(
            note_id,
            PendingSave {
                generation,
                content,
                task,
            },
        ) {
            previous.task.abort();
        }
    }

    async fn fire(&self, note_id: i64, generation: u64) {
        let content = {
            let mut pending = self.pending.lock().await;
            match pending.get(&note_id) {
                Some(save) if save.generation == generation => {
                    pending.remove(&note_id).map(|save| save.content)
                }
                _ => None,
            }
        };

        if let Some(content) = content {
            self.save(note_id, content).await;
        }
    }

    async fn save(&self, note_id: i64, content: String) {
        if let Err(e) = self.notes.auto_save(note_id, content).await {
            tracing::error!("Auto-save failed for note {}: {}", note_id, e);
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Write every pending edit now
    pub async fn flush(&self) {
        let drained: Vec<(i64, PendingSave)> = self.pending.lock().await.drain().collect();

        if !drained.is_empty() {
            tracing::info!("Flushing {} pending auto-save(s)", drained.len());
        }

        for (note_id, save) in drained {
            save.task.abort();
            self.save(note_id, save.content).await;
        }
    }

    /// Drop every pending edit without writing it
    pub async fn cancel_all(&self) {
        for (_, save) in self.pending.lock().await.drain() {
            save.task.abort();
        }
    }
}
