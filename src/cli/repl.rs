//! # REPL
//!
//! Interactive loop over a repository directory. The REPL drives a single
//! tree with 32-byte keys and 96-byte values (short inputs are zero-padded),
//! persisting the tree root in the allocator's reserved header slot so a
//! session picks up where the last one stopped.
//!
//! ```text
//! cowdb> insert aa AA
//! cowdb> seek aa
//! aa = AA
//! cowdb> next
//! cowdb> delete aa
//! ```
//!
//! Every mutation runs under a freshly minted transaction, so consecutive
//! commands exercise the copy-on-write path the same way separate writers
//! would. Errors print and the loop continues; `exit` or Ctrl+D leaves.

use eyre::{Result, WrapErr};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::Path;

use crate::btree::{BTree, Cursor, Node};
use crate::storage::{BlockAllocator, FarPtr, FileCache};
use crate::RowTraits;

const KEY_SIZE: u32 = 32;
const VALUE_SIZE: u32 = 96;

const PROMPT: &str = "cowdb> ";

pub struct Repl {
    cache: FileCache,
    editor: DefaultEditor,
    root: FarPtr,
    cursor: Cursor,
}

impl Repl {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut cache = FileCache::new(path);
        let root = BlockAllocator::new(&mut cache)
            .schema_root()
            .wrap_err("failed to read repository header")?;
        let editor = DefaultEditor::new().wrap_err("failed to initialize line editor")?;

        Ok(Self {
            cache,
            editor,
            root,
            cursor: Cursor::end(),
        })
    }

    pub fn run(&mut self) -> Result<()> {
        println!("cowdb repository at {}", self.cache.base_path().display());
        println!("type 'help' for commands");

        loop {
            match self.editor.readline(PROMPT) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    self.editor.add_history_entry(trimmed).ok();
                    if !self.dispatch(trimmed) {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => println!("^C"),
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("error reading input: {}", err);
                    break;
                }
            }
        }

        println!("bye");
        Ok(())
    }

    fn dispatch(&mut self, line: &str) -> bool {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("");
        let arg1 = parts.next();
        let arg2 = parts.next();

        let result = match command {
            "exit" | "quit" => return false,
            "help" => {
                print_help();
                Ok(())
            }
            "insert" | "ins" | "update" | "upd" | "upsert" | "ups" => {
                self.mutate_with_entry(command, arg1, arg2)
            }
            "seek" => self.seek(arg1),
            "delete" | "del" => self.delete(arg1),
            "begin" => self.navigate(|tree, _| tree.begin()),
            "end" => {
                self.cursor = Cursor::end();
                Ok(())
            }
            "next" => self.navigate(|tree, cursor| tree.next(cursor)),
            "prev" => self.navigate(|tree, cursor| tree.prev(cursor)),
            "show" => self.show(),
            "dump" => self.dump(),
            other => {
                eprintln!("unrecognised command: {}", other);
                Ok(())
            }
        };

        if let Err(e) = result {
            eprintln!("error: {}", e);
        }
        true
    }

    fn tree(cache: &mut FileCache, root: FarPtr) -> crate::Result<BTree<'_>> {
        BTree::new(cache, root, RowTraits::fixed(KEY_SIZE, VALUE_SIZE)?)
    }

    fn persist_root(&mut self, root: FarPtr) -> crate::Result<()> {
        self.root = root;
        BlockAllocator::new(&mut self.cache).set_schema_root(root)
    }

    fn mutate_with_entry(
        &mut self,
        command: &str,
        key: Option<&str>,
        value: Option<&str>,
    ) -> crate::Result<()> {
        let (Some(key), Some(value)) = (key, value) else {
            eprintln!("usage: {} <key> <value>", command);
            return Ok(());
        };

        let entry = make_entry(key, value);
        let tx = BlockAllocator::new(&mut self.cache).create_transaction()?;
        let mut tree = Self::tree(&mut self.cache, self.root)?;

        let cursor = match command {
            "insert" | "ins" => {
                let at = tree.seek_begin(&pad(key, KEY_SIZE as usize))?;
                tree.insert(tx, &at, &entry)?
            }
            "update" | "upd" => {
                let at = tree.seek_begin(&pad(key, KEY_SIZE as usize))?;
                tree.update(tx, &at, &entry)?
            }
            _ => tree.upsert(tx, &entry)?,
        };

        let root = tree.root();
        self.cursor = cursor;
        self.persist_root(root)
    }

    fn seek(&mut self, key: Option<&str>) -> crate::Result<()> {
        let Some(key) = key else {
            eprintln!("usage: seek <key>");
            return Ok(());
        };

        let mut tree = Self::tree(&mut self.cache, self.root)?;
        self.cursor = tree.seek_begin(&pad(key, KEY_SIZE as usize))?;
        if self.cursor.is_found() {
            let entry = tree.get_entry(&self.cursor)?;
            print_entry(&entry);
        } else {
            eprintln!("no entry at key");
        }
        Ok(())
    }

    fn delete(&mut self, key: Option<&str>) -> crate::Result<()> {
        let Some(key) = key else {
            eprintln!("usage: delete <key>");
            return Ok(());
        };

        let tx = BlockAllocator::new(&mut self.cache).create_transaction()?;
        let mut tree = Self::tree(&mut self.cache, self.root)?;
        let at = tree.seek_begin(&pad(key, KEY_SIZE as usize))?;
        if !at.is_found() {
            eprintln!("no entry at key");
            return Ok(());
        }

        let cursor = tree.remove(tx, &at)?;
        let root = tree.root();
        self.cursor = cursor;
        self.persist_root(root)
    }

    fn navigate<F>(&mut self, step: F) -> crate::Result<()>
    where
        F: FnOnce(&mut BTree<'_>, &Cursor) -> crate::Result<Cursor>,
    {
        let mut tree = Self::tree(&mut self.cache, self.root)?;
        let cursor = step(&mut tree, &self.cursor.clone())?;
        if cursor.is_ended() {
            println!("(end)");
        } else if let Ok(entry) = tree.get_entry(&cursor) {
            print_entry(&entry);
        }
        self.cursor = cursor;
        Ok(())
    }

    fn show(&mut self) -> crate::Result<()> {
        let mut tree = Self::tree(&mut self.cache, self.root)?;
        if self.cursor.is_ended() {
            println!("(end)");
            return Ok(());
        }
        match tree.get_entry(&self.cursor) {
            Ok(entry) => print_entry(&entry),
            Err(_) => eprintln!("no entry at cursor"),
        }
        Ok(())
    }

    fn dump(&mut self) -> crate::Result<()> {
        if self.root.is_null() {
            println!("empty tree");
            return Ok(());
        }
        let root = self.root;
        self.dump_node(root, 0)
    }

    fn dump_node(&mut self, at: FarPtr, depth: usize) -> crate::Result<()> {
        let node = {
            let mut it = self.cache.iter_at(at);
            Node::read_from(&mut it)?
        };
        let pad = "  ".repeat(depth);

        println!(
            "{}{} at {} (tx {}, {} entries)",
            pad,
            if node.is_leaf() { "leaf" } else { "branch" },
            at,
            node.transaction_id(),
            node.entry_count()
        );

        for position in 0..node.entry_count() {
            if node.is_leaf() {
                let entry = node.entry_at(position).to_vec();
                print!("{}  [{}] ", pad, position);
                print_entry(&entry);
            } else {
                let child = node.child_at(position)?;
                let key = node.entry_at(position)[..KEY_SIZE as usize].to_vec();
                println!("{}  [{}] {} ->", pad, position, display(&key));
                self.dump_node(child, depth + 1)?;
            }
        }
        Ok(())
    }
}

fn pad(text: &str, size: usize) -> Vec<u8> {
    let mut out = vec![0u8; size];
    let take = text.len().min(size);
    out[..take].copy_from_slice(&text.as_bytes()[..take]);
    out
}

fn make_entry(key: &str, value: &str) -> Vec<u8> {
    let mut entry = pad(key, KEY_SIZE as usize);
    entry.extend_from_slice(&pad(value, VALUE_SIZE as usize));
    entry
}

fn display(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn print_entry(entry: &[u8]) {
    let key = display(&entry[..KEY_SIZE as usize]);
    let value = display(&entry[KEY_SIZE as usize..]);
    println!("{} = {}", key, value);
}

fn print_help() {
    println!("commands:");
    println!("  insert <key> <value>   insert a new entry (fails on duplicates)");
    println!("  update <key> <value>   overwrite an existing entry");
    println!("  upsert <key> <value>   insert or overwrite");
    println!("  delete <key>           remove an entry");
    println!("  seek <key>             position the cursor at a key");
    println!("  begin / end            jump to the first entry / past the last");
    println!("  next / prev            step the cursor");
    println!("  show                   print the entry at the cursor");
    println!("  dump                   print the tree structure");
    println!("  exit                   leave");
}
