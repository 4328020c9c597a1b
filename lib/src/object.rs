//! The four object kinds and their canonical byte encodings (spec §3.2,
//! §4.1). This is the "Object Codec" component: pure, backend-agnostic
//! encode/decode plus the header format that the [`crate::object_id`] hasher
//! hashes over.

use chrono::DateTime;
use chrono::FixedOffset;
use chrono::Utc;

use crate::error::Error;
use crate::object_id::ObjectId;
use crate::repo_path::RepoPathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blob" => Some(Self::Blob),
            "tree" => Some(Self::Tree),
            "commit" => Some(Self::Commit),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }
}

/// One of the small, fixed set of tree entry modes (spec §3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Mode {
    RegularFile,
    ExecutableFile,
    Symlink,
    Subdirectory,
}

impl Mode {
    /// The ASCII code used in the canonical tree encoding. Chosen to match
    /// Git's own tree mode strings so a sha1-configured repository's objects
    /// are interoperable (spec §6.2).
    pub fn as_ascii(self) -> &'static str {
        match self {
            Self::RegularFile => "100644",
            Self::ExecutableFile => "100755",
            Self::Symlink => "120000",
            Self::Subdirectory => "40000",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "100644" => Some(Self::RegularFile),
            "100755" => Some(Self::ExecutableFile),
            "120000" => Some(Self::Symlink),
            "40000" => Some(Self::Subdirectory),
            _ => None,
        }
    }

    pub fn is_dir(self) -> bool {
        matches!(self, Self::Subdirectory)
    }
}

/// Header prefixed to every object's payload before hashing/compression:
/// `"<kind> <payload_length>\0"` (spec §4.1).
pub fn header(kind: ObjectKind, payload_len: usize) -> Vec<u8> {
    format!("{} {payload_len}\0", kind.as_str()).into_bytes()
}

/// The bytes that get hashed: header + payload, uncompressed (spec §4.1).
pub fn canonical_bytes(kind: ObjectKind, payload: &[u8]) -> Vec<u8> {
    let mut bytes = header(kind, payload.len());
    bytes.extend_from_slice(payload);
    bytes
}

/// Parses a `"<kind> <len>\0<payload>"` buffer (as read back from storage)
/// into its kind and payload, validating the declared length.
pub fn parse_canonical_bytes(bytes: &[u8]) -> Result<(ObjectKind, Vec<u8>), Error> {
    let nul = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::MalformedObject(None, "missing header terminator".into()))?;
    let header_str = std::str::from_utf8(&bytes[..nul])
        .map_err(|e| Error::MalformedObject(None, format!("non-utf8 header: {e}")))?;
    let (kind_str, len_str) = header_str
        .split_once(' ')
        .ok_or_else(|| Error::MalformedObject(None, "malformed header".into()))?;
    let kind = ObjectKind::parse(kind_str)
        .ok_or_else(|| Error::MalformedObject(None, format!("unknown object kind {kind_str}")))?;
    let declared_len: usize = len_str
        .parse()
        .map_err(|_| Error::MalformedObject(None, "non-numeric payload length".into()))?;
    let payload = &bytes[nul + 1..];
    if payload.len() != declared_len {
        return Err(Error::MalformedObject(
            None,
            format!(
                "payload length mismatch: header says {declared_len}, got {}",
                payload.len()
            ),
        ));
    }
    Ok((kind, payload.to_vec()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: Mode,
    pub name: String,
    pub id: ObjectId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    /// Kept sorted by [`RepoPathBuf::git_tree_sort_key`] at all times.
    entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn from_sorted_entries(entries: Vec<TreeEntry>) -> Result<Self, Error> {
        for w in entries.windows(2) {
            let a = sort_key(&w[0]);
            let b = sort_key(&w[1]);
            if a == b {
                return Err(Error::MalformedObject(
                    None,
                    format!("duplicate tree entry name {:?}", w[0].name),
                ));
            }
            if a > b {
                return Err(Error::MalformedObject(
                    None,
                    "tree entries not sorted".into(),
                ));
            }
        }
        Ok(Self { entries })
    }

    /// Builds a tree from unsorted entries by sorting them per the canonical
    /// order, rejecting duplicate names.
    pub fn build(mut entries: Vec<TreeEntry>) -> Result<Self, Error> {
        entries.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        Self::from_sorted_entries(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.as_ascii().as_bytes());
            out.push(b' ');
            out.extend_from_slice(entry.name.as_bytes());
            out.push(0);
            out.extend_from_slice(entry.id.as_bytes());
        }
        out
    }

    /// Decodes a tree payload. `id_len` is the repository's configured
    /// object-id width (spec §3.1: fixed per repository).
    pub fn decode(payload: &[u8], id_len: usize) -> Result<Self, Error> {
        let mut entries = Vec::new();
        let mut i = 0;
        while i < payload.len() {
            let sp = find(payload, i, b' ')
                .ok_or_else(|| Error::MalformedObject(None, "tree entry missing mode".into()))?;
            let mode_str = std::str::from_utf8(&payload[i..sp])
                .map_err(|_| Error::MalformedObject(None, "non-utf8 tree mode".into()))?;
            let mode = Mode::parse(mode_str)
                .ok_or_else(|| Error::MalformedObject(None, format!("unknown mode {mode_str}")))?;
            let nul = find(payload, sp + 1, 0)
                .ok_or_else(|| Error::MalformedObject(None, "tree entry missing name".into()))?;
            let name = std::str::from_utf8(&payload[sp + 1..nul])
                .map_err(|_| Error::MalformedObject(None, "non-utf8 tree name".into()))?
                .to_owned();
            let id_start = nul + 1;
            let id_end = id_start + id_len;
            if id_end > payload.len() {
                return Err(Error::MalformedObject(None, "truncated tree entry id".into()));
            }
            let id = ObjectId::from_bytes(payload[id_start..id_end].to_vec());
            entries.push(TreeEntry { mode, name, id });
            i = id_end;
        }
        Self::from_sorted_entries(entries)
    }
}

fn sort_key(entry: &TreeEntry) -> String {
    if entry.mode.is_dir() {
        format!("{}/", entry.name)
    } else {
        entry.name.clone()
    }
}

fn find(haystack: &[u8], start: usize, needle: u8) -> Option<usize> {
    haystack[start..].iter().position(|&b| b == needle).map(|p| p + start)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub unix_timestamp: i64,
    pub tz_offset_minutes: i32,
}

impl Signature {
    fn encode(&self) -> String {
        let sign = if self.tz_offset_minutes < 0 { '-' } else { '+' };
        let abs = self.tz_offset_minutes.unsigned_abs();
        format!(
            "{} <{}> {} {sign}{:02}{:02}",
            self.name,
            self.email,
            self.unix_timestamp,
            abs / 60,
            abs % 60
        )
    }

    fn decode(line: &str) -> Result<Self, Error> {
        let malformed = || Error::MalformedObject(None, format!("malformed signature: {line:?}"));
        let lt = line.find('<').ok_or_else(malformed)?;
        let gt = line.find('>').ok_or_else(malformed)?;
        let name = line[..lt].trim_end().to_owned();
        let email = line[lt + 1..gt].to_owned();
        let rest = line[gt + 1..].trim();
        let mut parts = rest.split_whitespace();
        let ts: i64 = parts.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
        let tz_str = parts.next().ok_or_else(malformed)?;
        if tz_str.len() != 5 {
            return Err(malformed());
        }
        let sign = if &tz_str[0..1] == "-" { -1 } else { 1 };
        let hh: i32 = tz_str[1..3].parse().map_err(|_| malformed())?;
        let mm: i32 = tz_str[3..5].parse().map_err(|_| malformed())?;
        Ok(Self {
            name,
            email,
            unix_timestamp: ts,
            tz_offset_minutes: sign * (hh * 60 + mm),
        })
    }

    /// Author/committer time rendered in its recorded offset, for `log`
    /// and `cat-file -p` (spec §6.3) to print alongside the raw unix
    /// timestamp rather than forcing callers to do the conversion.
    pub fn format_timestamp(&self) -> String {
        let offset = FixedOffset::east_opt(self.tz_offset_minutes * 60).unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        let utc = DateTime::<Utc>::from_timestamp(self.unix_timestamp, 0).unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is valid"));
        utc.with_timezone(&offset).to_rfc2822()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl Commit {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("tree {}\n", self.tree.to_hex()));
        for parent in &self.parents {
            out.push_str(&format!("parent {}\n", parent.to_hex()));
        }
        out.push_str(&format!("author {}\n", self.author.encode()));
        out.push_str(&format!("committer {}\n", self.committer.encode()));
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::MalformedObject(None, "non-utf8 commit".into()))?;
        let (header, message) = text
            .split_once("\n\n")
            .ok_or_else(|| Error::MalformedObject(None, "commit missing blank line".into()))?;
        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        for line in header.lines() {
            if let Some(rest) = line.strip_prefix("tree ") {
                tree = Some(ObjectId::from_hex(rest).ok_or_else(|| {
                    Error::MalformedObject(None, "malformed tree id in commit".into())
                })?);
            } else if let Some(rest) = line.strip_prefix("parent ") {
                parents.push(ObjectId::from_hex(rest).ok_or_else(|| {
                    Error::MalformedObject(None, "malformed parent id in commit".into())
                })?);
            } else if let Some(rest) = line.strip_prefix("author ") {
                author = Some(Signature::decode(rest)?);
            } else if let Some(rest) = line.strip_prefix("committer ") {
                committer = Some(Signature::decode(rest)?);
            }
        }
        Ok(Self {
            tree: tree.ok_or_else(|| Error::MalformedObject(None, "commit missing tree".into()))?,
            parents,
            author: author.ok_or_else(|| Error::MalformedObject(None, "commit missing author".into()))?,
            committer: committer
                .ok_or_else(|| Error::MalformedObject(None, "commit missing committer".into()))?,
            message: message.to_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub target: ObjectId,
    pub target_kind: ObjectKind,
    pub name: String,
    pub tagger: Signature,
    pub message: String,
}

impl Tag {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("object {}\n", self.target.to_hex()));
        out.push_str(&format!("kind {}\n", self.target_kind.as_str()));
        out.push_str(&format!("tag {}\n", self.name));
        out.push_str(&format!("tagger {}\n", self.tagger.encode()));
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::MalformedObject(None, "non-utf8 tag".into()))?;
        let (header, message) = text
            .split_once("\n\n")
            .ok_or_else(|| Error::MalformedObject(None, "tag missing blank line".into()))?;
        let mut target = None;
        let mut target_kind = None;
        let mut name = None;
        let mut tagger = None;
        for line in header.lines() {
            if let Some(rest) = line.strip_prefix("object ") {
                target = Some(
                    ObjectId::from_hex(rest)
                        .ok_or_else(|| Error::MalformedObject(None, "malformed tag target".into()))?,
                );
            } else if let Some(rest) = line.strip_prefix("kind ") {
                target_kind = Some(
                    ObjectKind::parse(rest)
                        .ok_or_else(|| Error::MalformedObject(None, "malformed tag kind".into()))?,
                );
            } else if let Some(rest) = line.strip_prefix("tag ") {
                name = Some(rest.to_owned());
            } else if let Some(rest) = line.strip_prefix("tagger ") {
                tagger = Some(Signature::decode(rest)?);
            }
        }
        Ok(Self {
            target: target.ok_or_else(|| Error::MalformedObject(None, "tag missing object".into()))?,
            target_kind: target_kind
                .ok_or_else(|| Error::MalformedObject(None, "tag missing kind".into()))?,
            name: name.ok_or_else(|| Error::MalformedObject(None, "tag missing name".into()))?,
            tagger: tagger.ok_or_else(|| Error::MalformedObject(None, "tag missing tagger".into()))?,
            message: message.to_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Blob(Vec<u8>),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Blob(_) => ObjectKind::Blob,
            Self::Tree(_) => ObjectKind::Tree,
            Self::Commit(_) => ObjectKind::Commit,
            Self::Tag(_) => ObjectKind::Tag,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Self::Blob(bytes) => bytes.clone(),
            Self::Tree(tree) => tree.encode(),
            Self::Commit(commit) => commit.encode(),
            Self::Tag(tag) => tag.encode(),
        }
    }

    pub fn decode(kind: ObjectKind, payload: &[u8], id_len: usize) -> Result<Self, Error> {
        Ok(match kind {
            ObjectKind::Blob => Self::Blob(payload.to_vec()),
            ObjectKind::Tree => Self::Tree(Tree::decode(payload, id_len)?),
            ObjectKind::Commit => Self::Commit(Commit::decode(payload)?),
            ObjectKind::Tag => Self::Tag(Tag::decode(payload)?),
        })
    }
}

/// Used by callers (tree builder, checkout) that need a path-qualified error.
#[allow(dead_code)]
pub(crate) fn path_context(path: &RepoPathBuf) -> String {
    path.as_internal_str().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_id::HashAlgorithm;

    fn sig() -> Signature {
        Signature {
            name: "A U Thor".into(),
            email: "a@example.com".into(),
            unix_timestamp: 1_700_000_000,
            tz_offset_minutes: -420,
        }
    }

    #[test]
    fn blob_round_trip_through_canonical_bytes() {
        let payload = b"hello\n".to_vec();
        let bytes = canonical_bytes(ObjectKind::Blob, &payload);
        let (kind, decoded_payload) = parse_canonical_bytes(&bytes).unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(decoded_payload, payload);
    }

    #[test]
    fn tree_sorts_directories_as_if_trailing_slash() {
        // "foo.txt" sorts before "foo/" under git's tree order because
        // '.' (0x2e) < '/' (0x2f), even though "foo" < "foo.txt" < "foo/"
        // as plain strings would put them differently.
        let entries = vec![
            TreeEntry {
                mode: Mode::Subdirectory,
                name: "foo".into(),
                id: ObjectId::from_bytes(vec![1; 32]),
            },
            TreeEntry {
                mode: Mode::RegularFile,
                name: "foo.txt".into(),
                id: ObjectId::from_bytes(vec![2; 32]),
            },
        ];
        let tree = Tree::build(entries).unwrap();
        assert_eq!(tree.entries()[0].name, "foo.txt");
        assert_eq!(tree.entries()[1].name, "foo");
    }

    #[test]
    fn tree_rejects_duplicate_names() {
        let entries = vec![
            TreeEntry {
                mode: Mode::RegularFile,
                name: "a".into(),
                id: ObjectId::from_bytes(vec![1; 32]),
            },
            TreeEntry {
                mode: Mode::RegularFile,
                name: "a".into(),
                id: ObjectId::from_bytes(vec![2; 32]),
            },
        ];
        assert!(Tree::build(entries).is_err());
    }

    #[test]
    fn tree_encode_decode_round_trip() {
        let entries = vec![
            TreeEntry {
                mode: Mode::RegularFile,
                name: "a.txt".into(),
                id: HashAlgorithm::Sha256.hash(b"a"),
            },
            TreeEntry {
                mode: Mode::ExecutableFile,
                name: "run.sh".into(),
                id: HashAlgorithm::Sha256.hash(b"run"),
            },
        ];
        let tree = Tree::build(entries).unwrap();
        let encoded = tree.encode();
        let decoded = Tree::decode(&encoded, 32).unwrap();
        assert_eq!(tree, decoded);
    }

    #[test]
    fn commit_encode_decode_round_trip() {
        let commit = Commit {
            tree: HashAlgorithm::Sha256.hash(b"tree"),
            parents: vec![HashAlgorithm::Sha256.hash(b"parent")],
            author: sig(),
            committer: sig(),
            message: "first\n".into(),
        };
        let encoded = commit.encode();
        let decoded = Commit::decode(&encoded).unwrap();
        assert_eq!(commit, decoded);
    }

    #[test]
    fn commit_with_no_trailing_newline_in_message_round_trips() {
        let mut commit = Commit {
            tree: HashAlgorithm::Sha256.hash(b"tree"),
            parents: vec![],
            author: sig(),
            committer: sig(),
            message: "no trailing newline".into(),
        };
        let decoded = Commit::decode(&commit.encode()).unwrap();
        assert_eq!(decoded.message, "no trailing newline");
        commit.message.push('\n');
        assert_ne!(decoded.message, commit.message);
    }

    #[test]
    fn tag_encode_decode_round_trip() {
        let tag = Tag {
            target: HashAlgorithm::Sha256.hash(b"target"),
            target_kind: ObjectKind::Commit,
            name: "v1.0.0".into(),
            tagger: sig(),
            message: "release\n".into(),
        };
        let decoded = Tag::decode(&tag.encode()).unwrap();
        assert_eq!(tag, decoded);
    }

    #[test]
    fn malformed_header_is_rejected() {
        let err = parse_canonical_bytes(b"not a header");
        assert!(err.is_err());
    }
}
