//! Append-only, per-context revision history on the local filesystem.
//!
//! ```text
//! <base>/<encoded-context>/<index>.<kind>            durable revisions
//! <base>/staging/<encoded-context>/<index>.<kind>    staged, not yet published
//! ```
//!
//! Files are written under a dot-prefixed temporary name and renamed into
//! place, so a crash never leaves a half-written file under a revision name.
//! Names that do not parse as `<index>.<add|remove>` are ignored; this covers
//! the `.key` file of hashed context directories and the `.watermark` left by
//! collapsing a context to nothing.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::term::{ContextKey, Triple, TripleSet};

use super::codec::{self, DecodeError};
use super::naming::{self, KEY_FILE, STAGING_DIR};
use super::{RevisionKind, StoreResult};

/// Handle to a revision written into the staging area.
///
/// Publishing a token relocates the staged file into the permanent log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StagedToken {
    pub context: ContextKey,
    pub index: u64,
    pub kind: RevisionKind,
}

/// Highest index ever used by a context whose revisions were all collapsed away.
const WATERMARK_FILE: &str = ".watermark";

/// Size and identity of one durable revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub index: u64,
    pub kind: RevisionKind,
    pub bytes: u64,
}

/// Durable revision history rooted at one base directory.
#[derive(Debug, Clone)]
pub struct RevisionLog {
    base: PathBuf,
    sync_writes: bool,
}

impl RevisionLog {
    /// Create a log over `base`. The directory must already exist.
    ///
    /// With `sync_writes` off, files and directories are not fsynced; useful
    /// for tests and bulk loads, never for data that must survive power loss.
    pub fn new(base: impl Into<PathBuf>, sync_writes: bool) -> Self {
        Self {
            base: base.into(),
            sync_writes,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn context_dir(&self, context: &ContextKey) -> PathBuf {
        self.base.join(naming::encode_context(context))
    }

    fn staging_dir(&self, context: &ContextKey) -> PathBuf {
        self.base
            .join(STAGING_DIR)
            .join(naming::encode_context(context))
    }

    /// Path of a durable revision file.
    pub fn revision_path(&self, context: &ContextKey, index: u64, kind: RevisionKind) -> PathBuf {
        self.context_dir(context).join(file_name(index, kind))
    }

    /// Path of a staged revision file.
    pub fn staged_path(&self, token: &StagedToken) -> PathBuf {
        self.staging_dir(&token.context)
            .join(file_name(token.index, token.kind))
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Durable revisions of `context` in replay order.
    ///
    /// A missing context directory yields an empty list.
    pub fn list_revisions(&self, context: &ContextKey) -> StoreResult<Vec<(u64, RevisionKind)>> {
        list_dir(&self.context_dir(context))
    }

    pub fn earliest(&self, context: &ContextKey) -> StoreResult<Option<u64>> {
        Ok(self.list_revisions(context)?.first().map(|(i, _)| *i))
    }

    pub fn latest(&self, context: &ContextKey) -> StoreResult<Option<u64>> {
        Ok(self.list_revisions(context)?.last().map(|(i, _)| *i))
    }

    /// Read and decode one durable revision.
    pub fn read(
        &self,
        context: &ContextKey,
        index: u64,
        kind: RevisionKind,
    ) -> StoreResult<Vec<Triple>> {
        let path = self.revision_path(context, index, kind);
        let corrupt = |message: String| StoreError::CorruptRevision {
            context: context.to_string(),
            index,
            message,
        };
        let bytes = fs::read(&path).map_err(|e| corrupt(format!("{}: {e}", path.display())))?;
        let (stored_kind, batch) = codec::decode(&bytes).map_err(|e| match e {
            DecodeError::Malformed(message) => corrupt(message),
            DecodeError::UnsupportedVersion(version) => StoreError::UnsupportedVersion {
                context: context.to_string(),
                index,
                version,
            },
        })?;
        if stored_kind != kind {
            return Err(corrupt(format!(
                "payload records kind {stored_kind} but file is named {kind}"
            )));
        }
        Ok(batch)
    }

    /// Replay every durable revision of `context` into `state`.
    pub fn replay_into(&self, context: &ContextKey, state: &mut TripleSet) -> StoreResult<()> {
        let revisions = self.list_revisions(context)?;
        for (index, kind) in &revisions {
            let batch = self.read(context, *index, *kind)?;
            apply_batch(state, *kind, batch);
        }
        tracing::debug!(
            context = %context,
            revisions = revisions.len(),
            triples = state.len(),
            "replayed context"
        );
        Ok(())
    }

    /// Reconstruct the durable triple set of `context`.
    pub fn replay(&self, context: &ContextKey) -> StoreResult<TripleSet> {
        let mut state = TripleSet::new();
        self.replay_into(context, &mut state)?;
        Ok(state)
    }

    /// Every context that has a durable directory, in key order.
    pub fn contexts(&self) -> StoreResult<Vec<ContextKey>> {
        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.base, e)),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.base, e))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            match naming::decode_context_dir(&entry.path(), &name) {
                Ok(Some(key)) => out.push(key),
                Ok(None) => {}
                Err(e) => tracing::warn!(dir = %name, error = %e, "skipping foreign directory"),
            }
        }
        out.sort();
        Ok(out)
    }

    /// Revision sizes for `context`, in replay order.
    pub fn history(&self, context: &ContextKey) -> StoreResult<Vec<RevisionInfo>> {
        self.list_revisions(context)?
            .into_iter()
            .map(|(index, kind)| {
                let path = self.revision_path(context, index, kind);
                let meta = fs::metadata(&path).map_err(|e| StoreError::io(&path, e))?;
                Ok(RevisionInfo {
                    index,
                    kind,
                    bytes: meta.len(),
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Staging and publishing
    // -----------------------------------------------------------------------

    /// The index the next staged revision of `context` should use.
    ///
    /// Accounts for staged files left behind by an interrupted commit so that
    /// a new revision never collides with one still waiting to be published,
    /// and for the watermark of a context collapsed to nothing so indices
    /// never go backwards.
    pub fn next_index(&self, context: &ContextKey) -> StoreResult<u64> {
        let durable = self.latest(context)?.unwrap_or(0);
        let staged = list_dir(&self.staging_dir(context))?
            .last()
            .map(|(i, _)| *i)
            .unwrap_or(0);
        let watermark = self.watermark(context)?;
        Ok(durable.max(staged).max(watermark) + 1)
    }

    /// Highest index recorded by collapsing `context` to an empty history.
    fn watermark(&self, context: &ContextKey) -> StoreResult<u64> {
        let path = self.context_dir(context).join(WATERMARK_FILE);
        match fs::read_to_string(&path) {
            Ok(text) => text.trim().parse().map_err(|_| StoreError::CorruptRevision {
                context: context.to_string(),
                index: 0,
                message: format!("unreadable watermark {text:?}"),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Write a batch into the staging area.
    pub fn write_staged(
        &self,
        context: &ContextKey,
        index: u64,
        kind: RevisionKind,
        batch: &[Triple],
    ) -> StoreResult<StagedToken> {
        let token = StagedToken {
            context: context.clone(),
            index,
            kind,
        };
        let bytes = codec::encode(kind, batch).map_err(|e| StoreError::Serialization {
            message: e.to_string(),
        })?;
        let dir = self.staging_dir(context);
        self.ensure_context_dir(&dir, context)?;
        self.write_atomic(&dir, &file_name(index, kind), &bytes)?;
        tracing::debug!(
            context = %context,
            index,
            kind = %kind,
            triples = batch.len(),
            bytes = bytes.len(),
            "staged revision"
        );
        Ok(token)
    }

    /// Move a staged revision into the permanent log.
    ///
    /// Publishing a token whose file already sits in the permanent log is a
    /// no-op, so an interrupted commit can be retried.
    pub fn publish(&self, token: &StagedToken) -> StoreResult<()> {
        let from = self.staged_path(token);
        let to = self.revision_path(&token.context, token.index, token.kind);
        let dir = self.context_dir(&token.context);
        self.ensure_context_dir(&dir, &token.context)?;

        match fs::rename(&from, &to) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound && to.exists() => {
                tracing::debug!(context = %token.context, index = token.index, "already published");
                return Ok(());
            }
            Err(e) => return Err(StoreError::io(&from, e)),
        }
        self.sync_dir(&dir)?;
        remove_staging_dir_if_done(&self.staging_dir(&token.context));
        tracing::debug!(
            context = %token.context,
            index = token.index,
            kind = %token.kind,
            "published revision"
        );
        Ok(())
    }

    /// Delete a staged revision without publishing it.
    pub fn discard_staged(&self, token: &StagedToken) -> StoreResult<()> {
        let path = self.staged_path(token);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&path, e)),
        }
        remove_staging_dir_if_done(&self.staging_dir(&token.context));
        tracing::debug!(
            context = %token.context,
            index = token.index,
            kind = %token.kind,
            "discarded staged revision"
        );
        Ok(())
    }

    /// Staged revisions currently sitting in the staging area, in order.
    pub fn staged_tokens(&self) -> StoreResult<Vec<StagedToken>> {
        let staging = self.base.join(STAGING_DIR);
        let entries = match fs::read_dir(&staging) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&staging, e)),
        };
        let mut tokens = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&staging, e))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let context = match naming::decode_context_dir(&entry.path(), &name) {
                Ok(Some(key)) => key,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(dir = %name, error = %e, "skipping foreign staging directory");
                    continue;
                }
            };
            for (index, kind) in list_dir(&entry.path())? {
                tokens.push(StagedToken {
                    context: context.clone(),
                    index,
                    kind,
                });
            }
        }
        tokens.sort();
        Ok(tokens)
    }

    // -----------------------------------------------------------------------
    // Compaction
    // -----------------------------------------------------------------------

    /// Replace the whole history of `context` with one Add revision holding
    /// `merged`, reusing the current maximum index.
    ///
    /// The consolidated file is written and renamed into place before any
    /// superseded revision is deleted. Deletions run oldest first and the
    /// Remove revision at the maximum index (if any) goes last; every state in
    /// between replays to `merged`. An empty `merged` leaves no revisions, only
    /// a watermark so the next revision is numbered past the old maximum.
    ///
    /// Returns the index of the consolidated revision, or `None` when the
    /// context had no history or ends up empty.
    pub fn collapse(&self, context: &ContextKey, merged: &[Triple]) -> StoreResult<Option<u64>> {
        let revisions = self.list_revisions(context)?;
        let Some(&(max, _)) = revisions.last() else {
            return Ok(None);
        };
        let dir = self.context_dir(context);

        if merged.is_empty() {
            self.write_atomic(&dir, WATERMARK_FILE, max.to_string().as_bytes())?;
        } else {
            let bytes = codec::encode(RevisionKind::Add, merged).map_err(|e| {
                StoreError::Serialization {
                    message: e.to_string(),
                }
            })?;
            self.write_atomic(&dir, &file_name(max, RevisionKind::Add), &bytes)?;
        }

        for &(index, kind) in &revisions {
            // <max>.add was overwritten above; <max>.remove must outlive the rest.
            if index == max && (kind == RevisionKind::Remove || !merged.is_empty()) {
                continue;
            }
            let path = self.revision_path(context, index, kind);
            fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        }
        if revisions.contains(&(max, RevisionKind::Remove)) {
            let path = self.revision_path(context, max, RevisionKind::Remove);
            fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        }
        self.sync_dir(&dir)?;

        let superseded = revisions.len();
        if merged.is_empty() {
            tracing::info!(
                context = %context,
                watermark = max,
                superseded,
                "collapsed context to empty history"
            );
            return Ok(None);
        }
        tracing::info!(
            context = %context,
            index = max,
            superseded,
            triples = merged.len(),
            "collapsed context history"
        );
        Ok(Some(max))
    }

    // -----------------------------------------------------------------------
    // File helpers
    // -----------------------------------------------------------------------

    /// Create a context directory, recording the full key when its name is
    /// hashed.
    fn ensure_context_dir(&self, dir: &Path, context: &ContextKey) -> StoreResult<()> {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        let Some(name) = context.name() else {
            return Ok(());
        };
        let dir_name = naming::encode_context(context);
        if !naming::is_hashed(&dir_name) {
            return Ok(());
        }
        let key_path = dir.join(KEY_FILE);
        match fs::read_to_string(&key_path) {
            Ok(stored) if stored == name => Ok(()),
            Ok(_) => Err(StoreError::InvalidContextName { name: dir_name }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.write_atomic(dir, KEY_FILE, name.as_bytes())
            }
            Err(e) => Err(StoreError::io(&key_path, e)),
        }
    }

    /// Write `bytes` to `dir/name` via a temporary file and an atomic rename.
    fn write_atomic(&self, dir: &Path, name: &str, bytes: &[u8]) -> StoreResult<()> {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        let tmp = dir.join(format!(".{name}.partial"));
        let target = dir.join(name);
        {
            let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
            file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
            if self.sync_writes {
                file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
            }
        }
        fs::rename(&tmp, &target).map_err(|e| StoreError::io(&target, e))?;
        self.sync_dir(dir)
    }

    fn sync_dir(&self, dir: &Path) -> StoreResult<()> {
        if !self.sync_writes {
            return Ok(());
        }
        #[cfg(unix)]
        {
            let handle = fs::File::open(dir).map_err(|e| StoreError::io(dir, e))?;
            handle.sync_all().map_err(|e| StoreError::io(dir, e))?;
        }
        Ok(())
    }
}

/// Apply one revision batch to a materialized state.
pub fn apply_batch(state: &mut TripleSet, kind: RevisionKind, batch: impl IntoIterator<Item = Triple>) {
    match kind {
        RevisionKind::Add => state.extend(batch),
        RevisionKind::Remove => {
            for triple in batch {
                state.remove(&triple);
            }
        }
    }
}

fn file_name(index: u64, kind: RevisionKind) -> String {
    format!("{index}.{}", kind.as_str())
}

/// Parse `<index>.<kind>`; the index must be canonical decimal and positive.
fn parse_file_name(name: &str) -> Option<(u64, RevisionKind)> {
    let (index, kind) = name.split_once('.')?;
    let kind = RevisionKind::parse(kind)?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) || index.starts_with('0') {
        return None;
    }
    let index: u64 = index.parse().ok()?;
    Some((index, kind))
}

/// Revision files in `dir`, sorted numerically by index then kind.
fn list_dir(dir: &Path) -> StoreResult<Vec<(u64, RevisionKind)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        if let Some(parsed) = entry.file_name().to_str().and_then(parse_file_name) {
            out.push(parsed);
        }
    }
    out.sort_unstable();
    Ok(out)
}

/// Remove a per-context staging directory once no revision is left in it.
fn remove_staging_dir_if_done(dir: &Path) {
    if list_dir(dir).is_ok_and(|revisions| revisions.is_empty()) {
        // Both fail harmlessly if the directory is gone or holds other entries.
        let _ = fs::remove_file(dir.join(KEY_FILE));
        let _ = fs::remove_dir(dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Term;
    use tempfile::TempDir;

    fn t(o: &str) -> Triple {
        Triple::new(Term::iri("s"), Term::iri("p"), Term::iri(o))
    }

    fn ctx() -> ContextKey {
        ContextKey::named("ctx")
    }

    fn commit(log: &RevisionLog, context: &ContextKey, kind: RevisionKind, batch: &[Triple]) -> u64 {
        let index = log.next_index(context).unwrap();
        let token = log.write_staged(context, index, kind, batch).unwrap();
        log.publish(&token).unwrap();
        index
    }

    #[test]
    fn missing_context_has_no_revisions() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        assert!(log.list_revisions(&ctx()).unwrap().is_empty());
        assert_eq!(log.latest(&ctx()).unwrap(), None);
        assert_eq!(log.earliest(&ctx()).unwrap(), None);
        assert!(log.replay(&ctx()).unwrap().is_empty());
        assert!(log.contexts().unwrap().is_empty());
    }

    #[test]
    fn staged_revisions_are_invisible_until_published() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), true);
        let token = log.write_staged(&ctx(), 1, RevisionKind::Add, &[t("o")]).unwrap();
        assert!(log.list_revisions(&ctx()).unwrap().is_empty());
        assert_eq!(log.staged_tokens().unwrap(), vec![token.clone()]);
        assert_eq!(log.next_index(&ctx()).unwrap(), 2);

        log.publish(&token).unwrap();
        assert_eq!(log.list_revisions(&ctx()).unwrap(), vec![(1, RevisionKind::Add)]);
        assert!(log.staged_tokens().unwrap().is_empty());

        // Publishing again is idempotent.
        log.publish(&token).unwrap();
        assert_eq!(log.read(&ctx(), 1, RevisionKind::Add).unwrap(), vec![t("o")]);
    }

    #[test]
    fn discard_removes_staged_file() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        let token = log.write_staged(&ctx(), 1, RevisionKind::Add, &[t("o")]).unwrap();
        log.discard_staged(&token).unwrap();
        log.discard_staged(&token).unwrap();
        assert!(log.staged_tokens().unwrap().is_empty());
        assert!(log.publish(&token).is_err());
    }

    #[test]
    fn replay_orders_indices_numerically() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        // Step n adds o<n> and then removes o<n-1>; only numeric order
        // leaves exactly o12 behind.
        for n in 1..=12u64 {
            commit(&log, &ctx(), RevisionKind::Add, &[t(&format!("o{n}"))]);
            if n > 1 {
                commit(&log, &ctx(), RevisionKind::Remove, &[t(&format!("o{}", n - 1))]);
            }
        }
        let indices: Vec<u64> = log
            .list_revisions(&ctx())
            .unwrap()
            .into_iter()
            .map(|(i, _)| i)
            .collect();
        assert_eq!(indices, (1..=23).collect::<Vec<_>>());
        assert_eq!(log.latest(&ctx()).unwrap(), Some(23));
        let state = log.replay(&ctx()).unwrap();
        assert_eq!(state, [t("o12")].into_iter().collect());
    }

    #[test]
    fn twelve_revisions_list_in_numeric_order() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        for n in 1..=12u64 {
            commit(&log, &ctx(), RevisionKind::Add, &[t(&n.to_string())]);
        }
        let indices: Vec<u64> = log
            .list_revisions(&ctx())
            .unwrap()
            .into_iter()
            .map(|(i, _)| i)
            .collect();
        assert_eq!(indices, (1..=12).collect::<Vec<_>>());
        assert_eq!(log.latest(&ctx()).unwrap(), Some(12));
        assert_eq!(log.earliest(&ctx()).unwrap(), Some(1));
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        commit(&log, &ctx(), RevisionKind::Add, &[t("o")]);
        let ctx_dir = dir.path().join(naming::encode_context(&ctx()));
        for junk in ["notes.txt", "01.add", "0.add", ".3.add.partial", "7.modify", "x.add"] {
            fs::write(ctx_dir.join(junk), b"junk").unwrap();
        }
        assert_eq!(log.list_revisions(&ctx()).unwrap(), vec![(1, RevisionKind::Add)]);
    }

    #[test]
    fn corrupt_payload_is_reported() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        commit(&log, &ctx(), RevisionKind::Add, &[t("a")]);
        commit(&log, &ctx(), RevisionKind::Add, &[t("b")]);
        fs::write(log.revision_path(&ctx(), 2, RevisionKind::Add), b"RKBR\x01\x00\x00garbage").unwrap();

        let err = log.replay(&ctx()).unwrap_err();
        assert!(
            matches!(err, StoreError::CorruptRevision { index: 2, .. }),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn kind_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        commit(&log, &ctx(), RevisionKind::Add, &[t("a")]);
        let add = log.revision_path(&ctx(), 1, RevisionKind::Add);
        let remove = log.revision_path(&ctx(), 1, RevisionKind::Remove);
        fs::rename(add, remove).unwrap();
        assert!(log.read(&ctx(), 1, RevisionKind::Remove).unwrap_err().is_corrupt_revision());
    }

    #[test]
    fn collapse_keeps_state_and_max_index() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), true);
        commit(&log, &ctx(), RevisionKind::Add, &[t("a"), t("b"), t("c")]);
        commit(&log, &ctx(), RevisionKind::Remove, &[t("b")]);
        commit(&log, &ctx(), RevisionKind::Add, &[t("d")]);
        commit(&log, &ctx(), RevisionKind::Remove, &[t("a")]);

        let before = log.replay(&ctx()).unwrap();
        let merged: Vec<Triple> = before.iter().cloned().collect();
        assert_eq!(log.collapse(&ctx(), &merged).unwrap(), Some(4));

        assert_eq!(log.list_revisions(&ctx()).unwrap(), vec![(4, RevisionKind::Add)]);
        assert_eq!(log.replay(&ctx()).unwrap(), before);
        assert_eq!(log.next_index(&ctx()).unwrap(), 5);
    }

    #[test]
    fn collapse_of_empty_state_removes_every_revision() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        commit(&log, &ctx(), RevisionKind::Add, &[t("a")]);
        commit(&log, &ctx(), RevisionKind::Remove, &[t("a")]);
        assert_eq!(log.collapse(&ctx(), &[]).unwrap(), None);
        assert!(log.list_revisions(&ctx()).unwrap().is_empty());
        assert!(log.history(&ctx()).unwrap().is_empty());
        assert!(log.replay(&ctx()).unwrap().is_empty());
        assert_eq!(log.earliest(&ctx()).unwrap(), None);
        assert_eq!(log.latest(&ctx()).unwrap(), None);
    }

    #[test]
    fn indices_keep_increasing_after_collapse_to_empty() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        commit(&log, &ctx(), RevisionKind::Add, &[t("a")]);
        commit(&log, &ctx(), RevisionKind::Remove, &[t("a")]);
        assert_eq!(log.collapse(&ctx(), &[]).unwrap(), None);
        assert_eq!(log.next_index(&ctx()).unwrap(), 3);

        assert_eq!(commit(&log, &ctx(), RevisionKind::Add, &[t("b")]), 3);
        assert_eq!(log.latest(&ctx()).unwrap(), Some(3));
        assert_eq!(log.replay(&ctx()).unwrap(), TripleSet::from([t("b")]));

        // A later non-empty collapse supersedes the watermark.
        assert_eq!(log.collapse(&ctx(), &[t("b")]).unwrap(), Some(3));
        assert_eq!(log.next_index(&ctx()).unwrap(), 4);
    }

    #[test]
    fn unreadable_watermark_is_reported() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        commit(&log, &ctx(), RevisionKind::Add, &[t("a")]);
        fs::write(dir.path().join("ctx").join(WATERMARK_FILE), b"lots").unwrap();
        let err = log.next_index(&ctx()).unwrap_err();
        assert!(err.is_corrupt_revision());
    }

    #[test]
    fn long_context_names_use_a_keyed_directory() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), true);
        let long = ContextKey::named(format!("http://example.org/graphs/{}", "segment/".repeat(40)));
        let other = ContextKey::named(format!("http://example.org/graphs/{}x", "segment/".repeat(40)));

        let token = log.write_staged(&long, 1, RevisionKind::Add, &[t("a")]).unwrap();
        assert_eq!(log.staged_tokens().unwrap(), vec![token.clone()]);
        log.publish(&token).unwrap();
        commit(&log, &other, RevisionKind::Add, &[t("b")]);

        let dir_name = naming::encode_context(&long);
        assert!(naming::is_hashed(&dir_name));
        assert!(dir_name.len() < 255);
        assert_eq!(
            fs::read_to_string(dir.path().join(&dir_name).join(KEY_FILE)).unwrap(),
            long.name().unwrap()
        );
        // Staging is cleaned up together with its key file.
        assert!(!dir.path().join(STAGING_DIR).join(&dir_name).exists());

        let mut expected = vec![long.clone(), other.clone()];
        expected.sort();
        assert_eq!(log.contexts().unwrap(), expected);
        assert_eq!(log.replay(&long).unwrap(), TripleSet::from([t("a")]));
        assert_eq!(log.replay(&other).unwrap(), TripleSet::from([t("b")]));
    }

    #[test]
    fn keyed_directory_rejects_a_different_name() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        let long = ContextKey::named("長".repeat(100));
        commit(&log, &long, RevisionKind::Add, &[t("a")]);

        let key_path = dir.path().join(naming::encode_context(&long)).join(KEY_FILE);
        fs::write(&key_path, "something else").unwrap();
        // The staging directory was cleaned up, so only publish sees the mismatch.
        let token = log.write_staged(&long, 2, RevisionKind::Add, &[t("b")]).unwrap();
        let err = log.publish(&token).unwrap_err();
        assert!(matches!(err, StoreError::InvalidContextName { .. }));
        assert!(log.contexts().unwrap().is_empty());
    }

    #[test]
    fn interrupted_collapse_states_replay_identically() {
        // Simulate each crash point of collapse by hand: consolidated revision
        // installed, superseded files partially deleted oldest first.
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        commit(&log, &ctx(), RevisionKind::Add, &[t("a"), t("b")]);
        commit(&log, &ctx(), RevisionKind::Remove, &[t("a")]);
        commit(&log, &ctx(), RevisionKind::Add, &[t("a"), t("c")]);
        commit(&log, &ctx(), RevisionKind::Remove, &[t("b")]);
        let expected = log.replay(&ctx()).unwrap();
        let merged: Vec<Triple> = expected.iter().cloned().collect();

        let bytes = codec::encode(RevisionKind::Add, &merged).unwrap();
        fs::write(log.revision_path(&ctx(), 4, RevisionKind::Add), bytes).unwrap();
        assert_eq!(log.replay(&ctx()).unwrap(), expected);

        for index in 1..=3u64 {
            let kind = if index % 2 == 1 { RevisionKind::Add } else { RevisionKind::Remove };
            fs::remove_file(log.revision_path(&ctx(), index, kind)).unwrap();
            assert_eq!(log.replay(&ctx()).unwrap(), expected, "after deleting {index}");
        }
        fs::remove_file(log.revision_path(&ctx(), 4, RevisionKind::Remove)).unwrap();
        assert_eq!(log.replay(&ctx()).unwrap(), expected);
    }

    #[test]
    fn contexts_lists_decoded_keys() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        commit(&log, &ContextKey::named("b/c"), RevisionKind::Add, &[t("x")]);
        commit(&log, &ContextKey::unnamed(), RevisionKind::Add, &[t("y")]);
        // Leave something staged so the staging directory exists.
        log.write_staged(&ContextKey::named("z"), 1, RevisionKind::Add, &[t("z")])
            .unwrap();
        fs::create_dir(dir.path().join("not_ours")).unwrap();

        assert_eq!(
            log.contexts().unwrap(),
            vec![ContextKey::unnamed(), ContextKey::named("b/c")]
        );
    }

    #[test]
    fn history_reports_sizes() {
        let dir = TempDir::new().unwrap();
        let log = RevisionLog::new(dir.path(), false);
        commit(&log, &ctx(), RevisionKind::Add, &[t("a")]);
        commit(&log, &ctx(), RevisionKind::Remove, &[t("a")]);
        let history = log.history(&ctx()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].kind, RevisionKind::Remove);
        assert!(history.iter().all(|r| r.bytes > 7));
    }
}
