use bytes::Bytes;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct TableEntry {
    pub size: usize,
    pub name: Bytes,
    pub value: Bytes,
}

impl TableEntry {
    fn new(name: Bytes, value: Bytes) -> Self {
        Self { size: name.len() + value.len() + 32, name, value }
    }
}

macro_rules! static_table {
    ( $( $name:expr => $value:expr ),+ $(,)? ) => {
        [
            $(
                TableEntry {
                    size: $name.len() + $value.len() + 32,
                    name: Bytes::from_static($name),
                    value: Bytes::from_static($value),
                }
            ),+
        ]
    };
}

/// https://httpwg.org/specs/rfc7541.html#static.table.definition
pub static STATIC_TABLE: [TableEntry; 61] = static_table![
    b":authority" => b"",
    b":method" => b"GET",
    b":method" => b"POST",
    b":path" => b"/",
    b":path" => b"/index.html",
    b":scheme" => b"http",
    b":scheme" => b"https",
    b":status" => b"200",
    b":status" => b"204",
    b":status" => b"206",
    b":status" => b"304",
    b":status" => b"400",
    b":status" => b"404",
    b":status" => b"500",
    b"accept-charset" => b"",
    b"accept-encoding" => b"gzip, deflate",
    b"accept-language" => b"",
    b"accept-ranges" => b"",
    b"accept" => b"",
    b"access-control-allow-origin" => b"",
    b"age" => b"",
    b"allow" => b"",
    b"authorization" => b"",
    b"cache-control" => b"",
    b"content-disposition" => b"",
    b"content-encoding" => b"",
    b"content-language" => b"",
    b"content-length" => b"",
    b"content-location" => b"",
    b"content-range" => b"",
    b"content-type" => b"",
    b"cookie" => b"",
    b"date" => b"",
    b"etag" => b"",
    b"expect" => b"",
    b"expires" => b"",
    b"from" => b"",
    b"host" => b"",
    b"if-match" => b"",
    b"if-modified-since" => b"",
    b"if-none-match" => b"",
    b"if-range" => b"",
    b"if-unmodified-since" => b"",
    b"last-modified" => b"",
    b"link" => b"",
    b"location" => b"",
    b"max-forwards" => b"",
    b"proxy-authenticate" => b"",
    b"proxy-authorization" => b"",
    b"range" => b"",
    b"referer" => b"",
    b"refresh" => b"",
    b"retry-after" => b"",
    b"server" => b"",
    b"set-cookie" => b"",
    b"strict-transport-security" => b"",
    b"transfer-encoding" => b"",
    b"user-agent" => b"",
    b"vary" => b"",
    b"via" => b"",
    b"www-authenticate" => b"",
];

/// Per-direction HPACK dynamic table: FIFO eviction from the tail, bounded by
/// `max_size` (spec.md §3 "HPACK dynamic table").
#[derive(Debug, Clone)]
pub struct DynamicTable {
    max_size: usize,
    current_size: usize,
    entries: VecDeque<TableEntry>,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self { max_size, current_size: 0, entries: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Index 1 = most recently inserted dynamic entry (combined index 62 when
    /// queried through [`CombinedTable`]).
    pub fn get(&self, index: usize) -> Option<&TableEntry> {
        self.entries.get(index - 1)
    }

    pub fn insert(&mut self, name: Bytes, value: Bytes) {
        let entry = TableEntry::new(name, value);
        if entry.size > self.max_size {
            // Full-entry-too-big empties the table without inserting it (spec.md §3).
            self.current_size = 0;
            self.entries.clear();
            return;
        }
        self.current_size += entry.size;
        self.entries.push_front(entry);
        self.evict_to_fit();
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to_fit();
    }

    fn evict_to_fit(&mut self) {
        while self.current_size > self.max_size {
            match self.entries.pop_back() {
                Some(evicted) => self.current_size -= evicted.size,
                None => break,
            }
        }
    }
}

/// Static + dynamic table combined index space (spec.md §3): 1..=61 static,
/// 62.. dynamic.
pub struct CombinedTable<'a> {
    pub dynamic: &'a DynamicTable,
}

impl<'a> CombinedTable<'a> {
    pub fn get(&self, index: usize) -> Option<&'a TableEntry> {
        if index == 0 {
            return None;
        }
        if index <= STATIC_TABLE.len() {
            return STATIC_TABLE.get(index - 1);
        }
        self.dynamic.get(index - STATIC_TABLE.len())
    }

    pub fn len(&self) -> usize {
        STATIC_TABLE.len() + self.dynamic.len()
    }
}
