//! Dual-path delivery reconciliation.
//!
//! A file can reach the receiver twice: once over the data channel and once
//! through the relay listing. Both paths funnel through one [`Reconciler`]
//! keyed on `(code, name, size)`, so whichever path lands first wins and the
//! other becomes a no-op.

use crate::core::store::RemoteFile;
use std::collections::HashSet;
use tracing::debug;

/// Identity of a file within one share, independent of delivery path.
///
/// There is no content hash on either path, so two distinct files that
/// share a name and byte size under the same code are indistinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub code: String,
    pub name: String,
    pub size: u64,
}

impl FileIdentity {
    pub fn new(code: &str, name: &str, size: u64) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            size,
        }
    }

    pub fn of_remote(file: &RemoteFile) -> Self {
        Self::new(&file.code, &file.name, file.size)
    }
}

/// What the caller should do with the outcome of one relay listing pass.
#[derive(Debug)]
pub enum DeliveryPlan {
    /// Nothing new since the last pass.
    Nothing,
    /// Exactly one new file: fetch it without asking.
    AutoDownload(RemoteFile),
    /// Several new files at once: present the list instead.
    Listed(Vec<RemoteFile>),
}

/// Decide how a batch of newly seen files is delivered.
///
/// Auto-download only fires for a lone new file, and only when the caller
/// allows it (session mode); manual fetches always list, leaving the
/// download decision to the user.
pub fn plan_delivery(new_files: Vec<RemoteFile>, auto_download: bool) -> DeliveryPlan {
    let mut new_files = new_files;
    match new_files.len() {
        0 => DeliveryPlan::Nothing,
        1 if auto_download => DeliveryPlan::AutoDownload(new_files.remove(0)),
        _ => DeliveryPlan::Listed(new_files),
    }
}

/// Per-session set of already-delivered file identities.
///
/// Shared between the data-channel receive hook and the listing poll loop;
/// cleared when the session ends so a later session under a reused code
/// starts fresh.
#[derive(Debug, Default)]
pub struct Reconciler {
    seen: HashSet<FileIdentity>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivery. Returns `true` if the identity was new, `false`
    /// if the file already arrived through either path.
    pub fn mark_delivered(&mut self, identity: FileIdentity) -> bool {
        let fresh = self.seen.insert(identity.clone());
        if !fresh {
            debug!(
                event = "delivery_deduplicated",
                name = %identity.name,
                size = identity.size
            );
        }
        fresh
    }

    /// Keep only the files not yet delivered, marking the survivors as
    /// delivered in the same pass.
    pub fn filter_new(&mut self, files: Vec<RemoteFile>) -> Vec<RemoteFile> {
        files
            .into_iter()
            .filter(|f| self.seen.insert(FileIdentity::of_remote(f)))
            .collect()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(code: &str, name: &str, size: u64) -> RemoteFile {
        RemoteFile {
            id: format!("id-{name}"),
            code: code.to_string(),
            name: name.to_string(),
            size,
            content_type: "application/octet-stream".to_string(),
            url: format!("memory://{name}"),
        }
    }

    #[test]
    fn test_mark_delivered_dedupes() {
        let mut rec = Reconciler::new();
        assert!(rec.mark_delivered(FileIdentity::new("7K2M9A", "a.txt", 3)));
        assert!(!rec.mark_delivered(FileIdentity::new("7K2M9A", "a.txt", 3)));
        // Same name, different size: a distinct file.
        assert!(rec.mark_delivered(FileIdentity::new("7K2M9A", "a.txt", 4)));
    }

    #[test]
    fn test_filter_new_across_polls() {
        let mut rec = Reconciler::new();
        let first = rec.filter_new(vec![remote("7K2M9A", "a.txt", 3)]);
        assert_eq!(first.len(), 1);

        // Second poll sees the same listing plus one addition.
        let second = rec.filter_new(vec![
            remote("7K2M9A", "a.txt", 3),
            remote("7K2M9A", "b.txt", 5),
        ]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "b.txt");
    }

    #[test]
    fn test_p2p_delivery_suppresses_relay_copy() {
        let mut rec = Reconciler::new();
        // The data channel delivered the file first.
        assert!(rec.mark_delivered(FileIdentity::new("7K2M9A", "a.txt", 3)));

        // The relay listing then shows the uploaded copy of the same file.
        assert!(rec.filter_new(vec![remote("7K2M9A", "a.txt", 3)]).is_empty());
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut rec = Reconciler::new();
        rec.mark_delivered(FileIdentity::new("7K2M9A", "a.txt", 3));
        rec.clear();
        assert!(rec.mark_delivered(FileIdentity::new("7K2M9A", "a.txt", 3)));
    }

    #[test]
    fn test_plan_delivery_thresholds() {
        assert!(matches!(plan_delivery(vec![], true), DeliveryPlan::Nothing));
        assert!(matches!(
            plan_delivery(vec![remote("7K2M9A", "a.txt", 3)], true),
            DeliveryPlan::AutoDownload(_)
        ));
        match plan_delivery(
            vec![remote("7K2M9A", "a.txt", 3), remote("7K2M9A", "b.txt", 5)],
            true,
        ) {
            DeliveryPlan::Listed(files) => assert_eq!(files.len(), 2),
            other => panic!("expected Listed, got {other:?}"),
        }
    }

    #[test]
    fn test_plan_delivery_manual_never_auto_downloads() {
        match plan_delivery(vec![remote("7K2M9A", "a.txt", 3)], false) {
            DeliveryPlan::Listed(files) => assert_eq!(files.len(), 1),
            other => panic!("expected Listed, got {other:?}"),
        }
    }
}
