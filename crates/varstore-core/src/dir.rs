//! The variable directory: hashed names to rope root pages.
//!
//! Page 0 is the hash page; each bucket heads a chain of hash-leaf
//! pages holding `{name, pg0, tstr}` tuples. Names hash with xxh3,
//! reduced modulo the bucket count. Tuples are uniquely keyed by name;
//! `tstr` is reserved format room and written empty.

use tracing::debug;
use varstore_error::{Result, StoreError};
use varstore_pager::{Pager, page::LeafTuple};
use varstore_rptree::RpTree;
use varstore_types::{PageType, PageTypeMask};
use xxhash_rust::xxh3::xxh3_64;

const HASH_PAGE_NO: u64 = 0;
const HP: PageTypeMask = PageTypeMask::HASH_PAGE;
const HL: PageTypeMask = PageTypeMask::HASH_LEAF;

/// Longest chain walked before declaring the directory corrupt.
const MAX_CHAIN: usize = 4096;

fn check_name(pager: &Pager, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::invalid_argument("variable name is empty"));
    }
    // A tuple must fit a fresh bucket page.
    let worst = 11 + LeafTuple::cost(name.len(), 0);
    if name.len() > usize::from(u16::MAX) || worst > pager.page_size() {
        return Err(StoreError::invalid_argument(format!(
            "variable name of {} bytes does not fit a directory page",
            name.len()
        )));
    }
    Ok(())
}

fn bucket_of(pager: &mut Pager, name: &str) -> Result<usize> {
    let page0 = pager.view(HP, HASH_PAGE_NO)?;
    let hp = page0.hash_page();
    if hp.is_empty() {
        return Err(StoreError::invalid_state("directory root has no buckets"));
    }
    Ok((xxh3_64(name.as_bytes()) % hp.len() as u64) as usize)
}

fn chain_head(pager: &mut Pager, bucket: usize) -> Result<u64> {
    Ok(pager.view(HP, HASH_PAGE_NO)?.hash_page().bucket(bucket))
}

/// Resolve `name` to its rope root page.
pub fn lookup(pager: &mut Pager, name: &str) -> Result<u64> {
    check_name(pager, name)?;
    let bucket = bucket_of(pager, name)?;
    let mut pgno = chain_head(pager, bucket)?;
    let mut walked = 0;
    while pgno != 0 {
        walked += 1;
        if walked > MAX_CHAIN {
            return Err(StoreError::invalid_state("directory bucket chain cycles"));
        }
        let leaf_page = pager.view(HL, pgno)?;
        let leaf = leaf_page.hash_leaf();
        if let Some((_, pg0)) = leaf.find(name.as_bytes())? {
            return Ok(pg0);
        }
        pgno = leaf.next();
    }
    Err(StoreError::DoesntExist {
        name: name.to_owned(),
    })
}

/// Create a variable: a fresh empty rope plus a directory tuple. The
/// rope's root page number is the variable's stable id.
pub fn create(pager: &mut Pager, name: &str) -> Result<u64> {
    check_name(pager, name)?;
    match lookup(pager, name) {
        Ok(_) => {
            return Err(StoreError::AlreadyExists {
                name: name.to_owned(),
            });
        }
        Err(StoreError::DoesntExist { .. }) => {}
        Err(err) => return Err(err),
    }

    let root = RpTree::create(pager)?.root();
    let bucket = bucket_of(pager, name)?;
    let head = chain_head(pager, bucket)?;

    // First bucket page in the chain with room for the tuple.
    let mut pgno = head;
    let mut walked = 0;
    while pgno != 0 {
        walked += 1;
        if walked > MAX_CHAIN {
            return Err(StoreError::invalid_state("directory bucket chain cycles"));
        }
        let fits = pager.view(HL, pgno)?.hash_leaf().fits(name.len(), 0)?;
        if fits {
            let mut tuples = pager.view(HL, pgno)?.hash_leaf().tuples_owned()?;
            tuples.push((name.as_bytes().to_vec(), root, Vec::new()));
            let mut leaf_page = pager.edit(HL, pgno)?;
            leaf_page.hash_leaf_mut().set_tuples(&tuples)?;
            debug!(name, root, "variable created");
            return Ok(root);
        }
        pgno = pager.view(HL, pgno)?.hash_leaf().next();
    }

    // No room anywhere: push a fresh bucket page at the chain head.
    let fresh = pager.allocate(PageType::HashLeaf)?;
    {
        let mut leaf_page = pager.edit(HL, fresh)?;
        let mut leaf = leaf_page.hash_leaf_mut();
        leaf.set_next(head);
        leaf.set_tuples(&[(name.as_bytes().to_vec(), root, Vec::new())])?;
    }
    let mut page0 = pager.edit(HP, HASH_PAGE_NO)?;
    page0.hash_page_mut().set_bucket(bucket, fresh);
    debug!(name, root, "variable created in fresh bucket page");
    Ok(root)
}

/// Remove `name` from the directory, returning its rope root. Emptied
/// bucket pages are unlinked from the chain and freed.
pub fn remove(pager: &mut Pager, name: &str) -> Result<u64> {
    check_name(pager, name)?;
    let bucket = bucket_of(pager, name)?;
    let mut prev = 0_u64;
    let mut pgno = chain_head(pager, bucket)?;
    let mut walked = 0;
    while pgno != 0 {
        walked += 1;
        if walked > MAX_CHAIN {
            return Err(StoreError::invalid_state("directory bucket chain cycles"));
        }
        let (found, next) = {
            let leaf_page = pager.view(HL, pgno)?;
            let leaf = leaf_page.hash_leaf();
            (leaf.find(name.as_bytes())?, leaf.next())
        };
        if let Some((idx, pg0)) = found {
            let mut tuples = pager.view(HL, pgno)?.hash_leaf().tuples_owned()?;
            tuples.remove(idx);
            if tuples.is_empty() {
                // Unlink the emptied page from the chain.
                if prev == 0 {
                    let mut page0 = pager.edit(HP, HASH_PAGE_NO)?;
                    page0.hash_page_mut().set_bucket(bucket, next);
                } else {
                    let mut prev_page = pager.edit(HL, prev)?;
                    prev_page.hash_leaf_mut().set_next(next);
                }
                pager.free(pgno)?;
            } else {
                let mut leaf_page = pager.edit(HL, pgno)?;
                leaf_page.hash_leaf_mut().set_tuples(&tuples)?;
            }
            debug!(name, pg0, "variable dropped from directory");
            return Ok(pg0);
        }
        prev = pgno;
        pgno = next;
    }
    Err(StoreError::DoesntExist {
        name: name.to_owned(),
    })
}
