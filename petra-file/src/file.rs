//! Container file: open/create, object get/put, close.
//!
//! A `File` is a suite of consecutive keyed records over an abstract byte
//! store. Opening parses the fixed header, the root directory and its key
//! list, the free-segment record, and the streamer-info record (whose
//! schemas are registered into the session registry so any stored class can
//! be decoded). Writing appends records at the end and rewrites the
//! metadata records + header on close.
//!
//! State machine: `Closed -> Open(read) | Open(write) -> Closed`. Within one
//! handle all operations are strictly sequential; a failed `get` leaves the
//! handle usable.

use crate::dir::{DirId, Directory, DIRECTORY_CLASS, DIR_RECORD_RESERVED};
use crate::freelist::FreeList;
use crate::header::{Header, BEGIN, LARGE_FILE_BOUNDARY};
use crate::key::Key;
use petra_core::block::{compress, decompress, Settings};
use petra_core::cursor::{ReadCursor, WriteCursor};
use petra_core::envelope::{check_envelope, close_envelope, read_envelope, write_envelope};
use petra_core::error::{Error, Result};
use petra_core::store::{DiskStore, ReadAt, WriteAt};
use petra_schema::{decode_any, encode_any, Registry, Streamed, StreamerInfo};
use std::path::Path;
use std::sync::Arc;

/// Class of the name record at `begin`.
const FILE_CLASS: &str = "PFile";

/// Class and well-known name of the streamer-info record.
const STREAMER_LIST_CLASS: &str = "PStreamerList";
const STREAMER_RECORD_NAME: &str = "StreamerInfo";
const STREAMER_LIST_VERSION: u16 = 1;

/// Class of the free-segment record.
const FREE_RECORD_CLASS: &str = "PFree";

/// Creation-time options.
#[derive(Debug, Clone)]
pub struct FileConfig {
    /// Compression applied to stored objects (and inherited by trees).
    pub compression: Settings,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            compression: Settings::default(),
        }
    }
}

enum Store {
    Read(Arc<dyn ReadAt>),
    Write(Arc<dyn WriteAt>),
}

impl Store {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        match self {
            Store::Read(s) => s.read_at(offset, buf),
            Store::Write(s) => s.read_at(offset, buf),
        }
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        match self {
            Store::Read(_) => Err(Error::misuse("file is open read-only")),
            Store::Write(s) => s.write_at(offset, data),
        }
    }

    fn sync(&self) -> Result<()> {
        match self {
            Store::Read(_) => Ok(()),
            Store::Write(s) => s.sync(),
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Store::Read(_) => f.write_str("Store::Read"),
            Store::Write(_) => f.write_str("Store::Write"),
        }
    }
}

/// An open container file.
#[derive(Debug)]
pub struct File {
    store: Store,
    header: Header,
    name: String,
    title: String,
    dirs: Vec<Directory>,
    free: FreeList,
    registry: Arc<Registry>,
    closed: bool,
}

impl File {
    // ------------------------------------------------------------------
    // Open / create
    // ------------------------------------------------------------------

    /// Open an existing container for reading.
    pub fn open(store: Arc<dyn ReadAt>, registry: Arc<Registry>) -> Result<File> {
        let size = store.size()?;
        if size < BEGIN {
            return Err(Error::invalid_file(format!(
                "{size} bytes is smaller than the fixed header"
            )));
        }
        let mut head_buf = vec![0u8; BEGIN as usize];
        store.read_at(0, &mut head_buf)?;
        let header = Header::decode(&head_buf)?;

        let mut file = File {
            store: Store::Read(store),
            header,
            name: String::new(),
            title: String::new(),
            dirs: Vec::new(),
            free: FreeList::new(),
            registry,
            closed: false,
        };

        // Name record.
        let (name_key, name_payload) = file.read_record_at(file.header.begin)?;
        if name_key.nbytes != file.header.nbytes_name {
            return Err(Error::invalid_file(format!(
                "name record is {} bytes, header declares {}",
                name_key.nbytes, file.header.nbytes_name
            )));
        }
        let mut r = ReadCursor::new(&name_payload);
        file.name = r.read_string()?;
        file.title = r.read_string()?;

        // Root directory record + key list.
        let seek_root = file.header.begin + file.header.nbytes_name as u64;
        let mut dir_buf = vec![0u8; DIR_RECORD_RESERVED as usize];
        file.store.read_at(seek_root, &mut dir_buf)?;
        let mut r = ReadCursor::new(&dir_buf);
        let root = Directory::decode_record(file.name.clone(), file.title.clone(), &mut r)?;
        file.dirs.push(root);
        file.load_keys(0)?;
        file.load_subdirs(0)?;

        // Free segments.
        if file.header.seek_free != 0 {
            let (_, payload) = file.read_record_at(file.header.seek_free)?;
            file.free = FreeList::decode(&payload)?;
        }

        // Streamer infos: register every schema the file carries.
        if file.header.seek_info != 0 {
            let (_, payload) = file.read_record_at(file.header.seek_info)?;
            let mut r = ReadCursor::new(&payload);
            let env = read_envelope(&mut r)?;
            if env.vers > STREAMER_LIST_VERSION {
                return Err(Error::UnsupportedVersion {
                    class: STREAMER_LIST_CLASS.to_string(),
                    got: env.vers,
                    known: STREAMER_LIST_VERSION,
                });
            }
            let n = r.read_u32()?;
            for _ in 0..n {
                let info = StreamerInfo::decode(&mut r)?;
                file.registry.register_info(info);
            }
            check_envelope(&r, &env, STREAMER_LIST_CLASS)?;
        }

        tracing::debug!(
            name = %file.name,
            keys = file.dirs[0].keys.len(),
            dirs = file.dirs.len(),
            end = file.header.end,
            "container opened"
        );
        Ok(file)
    }

    /// Open a container file on disk for reading.
    pub fn open_path(path: impl AsRef<Path>, registry: Arc<Registry>) -> Result<File> {
        let store = DiskStore::open(path)?;
        File::open(Arc::new(store), registry)
    }

    /// Create a fresh container on a writable store.
    pub fn create(
        store: Arc<dyn WriteAt>,
        name: &str,
        cfg: FileConfig,
        registry: Arc<Registry>,
    ) -> Result<File> {
        let header = Header::new(cfg.compression.to_id());
        let mut file = File {
            store: Store::Write(store),
            header,
            name: name.to_string(),
            title: String::new(),
            dirs: Vec::new(),
            free: FreeList::new(),
            registry,
            closed: false,
        };

        // Name record at `begin`.
        let mut payload = WriteCursor::new();
        payload.write_string(name);
        payload.write_string(&file.title);
        let payload = payload.into_bytes();
        let key_len = Key::sizeof(FILE_CLASS, name, "", false);
        let seek = file.header.begin;
        let key = Key::new(
            FILE_CLASS,
            name,
            "",
            1,
            payload.len() as u32,
            payload.len() as u32,
            seek,
            0,
            false,
        );
        debug_assert_eq!(key.key_len, key_len);
        let mut w = WriteCursor::new();
        key.encode(&mut w);
        w.write_bytes(&payload);
        file.store.write_at(seek, w.bytes())?;
        file.header.nbytes_name = key.nbytes;

        // Root directory record, in a reserved slot so close can rewrite it
        // in place.
        let mut root = Directory::new(name, "");
        root.seek_dir = seek + key.nbytes as u64;
        root.nbytes_name = key.nbytes;
        file.header.end = root.seek_dir + DIR_RECORD_RESERVED as u64;
        file.store.write_at(root.seek_dir, &root.encode_record())?;
        file.dirs.push(root);

        file.store.write_at(0, &file.header.encode())?;
        tracing::debug!(name = %file.name, "container created");
        Ok(file)
    }

    /// Create a fresh container file on disk.
    pub fn create_path(
        path: impl AsRef<Path>,
        cfg: FileConfig,
        registry: Arc<Registry>,
    ) -> Result<File> {
        let name = path
            .as_ref()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let store = DiskStore::create(path)?;
        File::create(Arc::new(store), &name, cfg, registry)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.store, Store::Write(_)) && !self.closed
    }

    /// The root directory.
    pub fn root(&self) -> &Directory {
        &self.dirs[0]
    }

    /// A directory by arena id.
    pub fn dir(&self, id: DirId) -> &Directory {
        &self.dirs[id.0]
    }

    /// Find a child directory of `parent` by name.
    pub fn dir_by_name(&self, parent: DirId, name: &str) -> Option<DirId> {
        self.dirs[parent.0]
            .children
            .iter()
            .copied()
            .find(|&c| self.dirs[c].name == name)
            .map(DirId)
    }

    /// Compression settings stored objects are framed with.
    pub fn compression(&self) -> Result<Settings> {
        Settings::from_id(self.header.compression)
    }

    // ------------------------------------------------------------------
    // Object access
    // ------------------------------------------------------------------

    /// Fetch the highest-cycle object stored under `name` in the root.
    pub fn get(&self, name: &str) -> Result<Box<dyn Streamed>> {
        self.get_in(DirId::ROOT, name)
    }

    /// Fetch the highest-cycle object stored under `name` in a directory.
    pub fn get_in(&self, dir: DirId, name: &str) -> Result<Box<dyn Streamed>> {
        let key = self.dirs[dir.0]
            .best_key(name)
            .ok_or_else(|| Error::not_found(format!("no key {name:?}")))?
            .clone();
        self.read_object(&key)
    }

    /// Fetch an explicit cycle of `name` from the root.
    pub fn get_cycle(&self, name: &str, cycle: u16) -> Result<Box<dyn Streamed>> {
        let key = self.dirs[0]
            .key_at_cycle(name, cycle)
            .ok_or_else(|| Error::not_found(format!("no key {name:?} at cycle {cycle}")))?
            .clone();
        self.read_object(&key)
    }

    /// Decompress and decode the object a key points at.
    pub fn read_object(&self, key: &Key) -> Result<Box<dyn Streamed>> {
        self.check_open()?;
        let (disk_key, data) = self.read_record_at(key.seek_key)?;
        if disk_key.class != key.class {
            return Err(Error::invalid_file(format!(
                "key {:?}: index says class {:?}, record says {:?}",
                key.name, key.class, disk_key.class
            )));
        }
        let mut r = ReadCursor::new(&data);
        decode_any(&mut r, &key.class, &self.registry)
    }

    /// Store `obj` under `name` in the root directory.
    pub fn put(&mut self, name: &str, obj: &dyn Streamed) -> Result<()> {
        self.put_in(DirId::ROOT, name, "", obj)
    }

    /// Store `obj` under `name` in a directory. A name already present gets
    /// a new key with an incremented cycle; older cycles stay retrievable.
    pub fn put_in(
        &mut self,
        dir: DirId,
        name: &str,
        title: &str,
        obj: &dyn Streamed,
    ) -> Result<()> {
        self.check_writable()?;
        let mut w = WriteCursor::new();
        encode_any(&mut w, obj, &self.registry)?;
        let obj_bytes = w.into_bytes();
        let obj_len = obj_bytes.len() as u32;

        let settings = self.compression()?;
        let stored = compress(&obj_bytes, settings)?.unwrap_or(obj_bytes);

        let cycle = self.dirs[dir.0].next_cycle(name);
        let seek_dir = self.dirs[dir.0].seek_dir;
        let key =
            self.write_keyed_record(obj.class(), name, title, cycle, obj_len, &stored, seek_dir)?;
        tracing::debug!(
            name,
            class = obj.class(),
            cycle,
            raw = obj_len,
            stored = stored.len(),
            seek = key.seek_key,
            "object stored"
        );
        self.dirs[dir.0].keys.push(key);
        Ok(())
    }

    /// Create a sub-directory. Its record slot is allocated immediately so
    /// keys written into it carry a stable directory pointer.
    pub fn mkdir(&mut self, parent: DirId, name: &str) -> Result<DirId> {
        self.check_writable()?;
        if self.dir_by_name(parent, name).is_some() {
            return Err(Error::misuse(format!(
                "directory {name:?} already exists"
            )));
        }
        let parent_seek = self.dirs[parent.0].seek_dir;
        let large = self.header.end > LARGE_FILE_BOUNDARY;
        let key_len = Key::sizeof(DIRECTORY_CLASS, name, "", large) as u32;
        let nbytes = key_len + DIR_RECORD_RESERVED;
        let seek = self.alloc(nbytes as u64);
        let key = Key::new(
            DIRECTORY_CLASS,
            name,
            "",
            1,
            DIR_RECORD_RESERVED,
            DIR_RECORD_RESERVED,
            seek,
            parent_seek,
            large,
        );

        let mut child = Directory::new(name, "");
        child.parent = Some(parent.0);
        child.seek_dir = seek + key_len as u64;
        child.seek_parent = parent_seek;

        let mut w = WriteCursor::new();
        key.encode(&mut w);
        let mut record = child.encode_record();
        record.resize(DIR_RECORD_RESERVED as usize, 0);
        w.write_bytes(&record);
        self.store.write_at(seek, w.bytes())?;

        self.dirs[parent.0].keys.push(key);
        let id = self.dirs.len();
        self.dirs[parent.0].children.push(id);
        self.dirs.push(child);
        tracing::debug!(name, parent = parent.0, "directory created");
        Ok(DirId(id))
    }

    // ------------------------------------------------------------------
    // Raw blocks (the tree store's baskets are key-less records)
    // ------------------------------------------------------------------

    /// Append a raw block, returning its offset.
    pub fn write_block(&mut self, data: &[u8]) -> Result<u64> {
        self.check_writable()?;
        let seek = self.alloc(data.len() as u64);
        self.store.write_at(seek, data)?;
        Ok(seek)
    }

    /// Read a raw block written by [`write_block`].
    pub fn read_block(&self, seek: u64, len: usize) -> Result<Vec<u8>> {
        self.check_open()?;
        let mut buf = vec![0u8; len];
        self.store.read_at(seek, &mut buf)?;
        Ok(buf)
    }

    // ------------------------------------------------------------------
    // Close
    // ------------------------------------------------------------------

    /// Flush metadata and close. Read-only handles just transition to
    /// `Closed`; writable handles persist the streamer-info record, every
    /// key list, the free-segment record, and the rewritten header. Any I/O
    /// failure underneath surfaces as `FlushError`.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if matches!(self.store, Store::Write(_)) {
            self.flush().map_err(|e| match e {
                err @ Error::Flush(_) => err,
                other => Error::flush(other.to_string()),
            })?;
        }
        self.closed = true;
        tracing::debug!(name = %self.name, "container closed");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        // 1. Streamer infos, so readers can decode what this session wrote.
        let infos = self.registry.infos();
        let mut w = WriteCursor::new();
        let h = write_envelope(&mut w, STREAMER_LIST_VERSION);
        w.write_u32(infos.len() as u32);
        for info in &infos {
            info.encode(&mut w);
        }
        close_envelope(&mut w, h);
        let payload = w.into_bytes();
        let obj_len = payload.len() as u32;
        let stored = compress(&payload, self.compression()?)?.unwrap_or(payload);
        if self.header.seek_info != 0 {
            self.free.add(
                self.header.seek_info,
                self.header.seek_info + self.header.nbytes_info as u64 - 1,
            );
        }
        let root_seek = self.dirs[0].seek_dir;
        let key = self.write_keyed_record(
            STREAMER_LIST_CLASS,
            STREAMER_RECORD_NAME,
            "",
            1,
            obj_len,
            &stored,
            root_seek,
        )?;
        self.header.seek_info = key.seek_key;
        self.header.nbytes_info = key.nbytes;

        // 2. Key lists (every directory), freeing the superseded records.
        for idx in 0..self.dirs.len() {
            let payload = self.dirs[idx].encode_key_list();
            if self.dirs[idx].seek_keys != 0 {
                let old_seek = self.dirs[idx].seek_keys;
                let old_len = self.dirs[idx].nbytes_keys;
                self.free.add(old_seek, old_seek + old_len as u64 - 1);
            }
            let (dir_name, dir_seek) =
                (self.dirs[idx].name.clone(), self.dirs[idx].seek_dir);
            let key = self.write_keyed_record(
                DIRECTORY_CLASS,
                &dir_name,
                "",
                1,
                payload.len() as u32,
                &payload,
                dir_seek,
            )?;
            self.dirs[idx].seek_keys = key.seek_key;
            self.dirs[idx].nbytes_keys = key.nbytes;
        }

        // 3. Free-segment record (after all frees are known).
        if self.header.seek_free != 0 {
            self.free.add(
                self.header.seek_free,
                self.header.seek_free + self.header.nbytes_free as u64 - 1,
            );
        }
        let payload = self.free.encode();
        let name = self.name.clone();
        let root_seek = self.dirs[0].seek_dir;
        let key = self.write_keyed_record(
            FREE_RECORD_CLASS,
            &name,
            "",
            1,
            payload.len() as u32,
            &payload,
            root_seek,
        )?;
        self.header.seek_free = key.seek_key;
        self.header.nbytes_free = key.nbytes;
        self.header.nfree = self.free.len() as u32;

        // 4. Directory records, rewritten in their reserved slots.
        for idx in 0..self.dirs.len() {
            let mut record = self.dirs[idx].encode_record();
            record.resize(DIR_RECORD_RESERVED as usize, 0);
            self.store.write_at(self.dirs[idx].seek_dir, &record)?;
        }

        // 5. Header, boosted to 8-byte pointers when the file outgrew them.
        if self.header.end > LARGE_FILE_BOUNDARY {
            self.header.units = 8;
        }
        self.store.write_at(0, &self.header.encode())?;
        self.store.sync()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::misuse("file is closed"));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if !matches!(self.store, Store::Write(_)) {
            return Err(Error::misuse("file is open read-only"));
        }
        Ok(())
    }

    fn alloc(&mut self, n: u64) -> u64 {
        let at = self.header.end;
        self.header.end += n;
        at
    }

    #[allow(clippy::too_many_arguments)]
    fn write_keyed_record(
        &mut self,
        class: &str,
        name: &str,
        title: &str,
        cycle: u16,
        obj_len: u32,
        stored: &[u8],
        seek_dir: u64,
    ) -> Result<Key> {
        let large = self.header.end > LARGE_FILE_BOUNDARY;
        let key_len = Key::sizeof(class, name, title, large) as u32;
        let seek = self.alloc(key_len as u64 + stored.len() as u64);
        let key = Key::new(
            class,
            name,
            title,
            cycle,
            obj_len,
            stored.len() as u32,
            seek,
            seek_dir,
            large,
        );
        let mut w = WriteCursor::new();
        key.encode(&mut w);
        w.write_bytes(stored);
        self.store.write_at(seek, w.bytes())?;
        Ok(key)
    }

    /// Read a keyed record: key header + decompressed payload.
    fn read_record_at(&self, seek: u64) -> Result<(Key, Vec<u8>)> {
        let mut len_buf = [0u8; 4];
        self.store.read_at(seek, &mut len_buf)?;
        let nbytes = u32::from_be_bytes(len_buf) as usize;
        if nbytes < 20 {
            return Err(Error::invalid_file(format!(
                "record at {seek} declares {nbytes} bytes"
            )));
        }
        let mut buf = vec![0u8; nbytes];
        self.store.read_at(seek, &mut buf)?;
        let mut r = ReadCursor::new(&buf);
        let key = Key::decode(&mut r)?;
        if key.seek_key != seek {
            return Err(Error::invalid_file(format!(
                "record at {seek}: self pointer says {}",
                key.seek_key
            )));
        }
        let payload = &buf[key.key_len as usize..];
        let data = if key.is_compressed() {
            decompress(payload, key.obj_len as usize)?
        } else {
            payload.to_vec()
        };
        Ok((key, data))
    }

    /// Load a directory's key list record.
    fn load_keys(&mut self, idx: usize) -> Result<()> {
        let (seek_keys, nbytes_keys) = (self.dirs[idx].seek_keys, self.dirs[idx].nbytes_keys);
        if seek_keys == 0 || nbytes_keys == 0 {
            return Ok(());
        }
        let (_, payload) = self.read_record_at(seek_keys)?;
        let mut r = ReadCursor::new(&payload);
        self.dirs[idx].decode_key_list(&mut r)
    }

    /// Recursively load sub-directories named in `idx`'s key list.
    fn load_subdirs(&mut self, idx: usize) -> Result<()> {
        let mut dir_keys: Vec<Key> = Vec::new();
        for key in self.dirs[idx].keys.iter() {
            if key.class == DIRECTORY_CLASS {
                // Highest cycle per name wins, like any other key.
                match dir_keys.iter_mut().find(|k| k.name == key.name) {
                    Some(existing) if existing.cycle < key.cycle => *existing = key.clone(),
                    Some(_) => {}
                    None => dir_keys.push(key.clone()),
                }
            }
        }
        for key in dir_keys {
            let (_, payload) = self.read_record_at(key.seek_key)?;
            let mut r = ReadCursor::new(&payload);
            let mut child = Directory::decode_record(key.name.clone(), key.title.clone(), &mut r)?;
            child.parent = Some(idx);
            let child_idx = self.dirs.len();
            self.dirs.push(child);
            self.dirs[idx].children.push(child_idx);
            self.load_keys(child_idx)?;
            self.load_subdirs(child_idx)?;
        }
        Ok(())
    }
}
