// Thin command front-end over the query facade.  All real work happens in
// the library; this file only dispatches on a command word and prints.

use anyhow::{bail, Context, Result};

use pagecheck::{accountant, queries, schema, PageNum, Pager};

const USAGE: &str = "usage: pagecheck <dbfile> <command> [args]

commands:
  freelist-check             verify the freelist chain against the header
  account                    classify every page and report totals
  conflicts                  pages on both the freelist and a btree
  owner <pgno> [<pgno>...]   which btree or freelist reaches the page(s)
  dump <root|table> <rowid>  locate a row by rowid and dump its record";

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        bail!("{}", USAGE);
    }
    let path = &args[1];
    let mut pager =
        Pager::open(path).with_context(|| format!("could not open database {}", path))?;

    match args[2].as_str() {
        "freelist-check" => {
            let report = queries::freelist_check(&mut pager)?;
            print!("{}", report);
        }
        "account" => {
            let roots = schema::list_roots(&mut pager)?;
            let acct = accountant::account(&mut pager, &roots)?;
            print!("{}", acct);
            write_page_list("orphan_pages.txt", &acct.orphan_pages())?;
            write_page_list("unknown_pages.txt", &acct.unknown_pages())?;
        }
        "conflicts" => {
            let roots = schema::list_roots(&mut pager)?;
            let report = queries::find_conflicts(&mut pager, &roots)?;
            print!("{}", report);
        }
        "owner" => {
            if args.len() < 4 {
                bail!("{}", USAGE);
            }
            let pages = args[3..]
                .iter()
                .map(|a| a.parse::<PageNum>().with_context(|| format!("bad page number {}", a)))
                .collect::<Result<Vec<_>>>()?;
            let roots = schema::list_roots(&mut pager)?;
            let report = queries::page_owner(&mut pager, &roots, &pages)?;
            print!("{}", report);
        }
        "dump" => {
            if args.len() < 5 {
                bail!("{}", USAGE);
            }
            let root = resolve_root(&mut pager, &args[3])?;
            let rowid: i64 = args[4]
                .parse()
                .with_context(|| format!("bad rowid {}", args[4]))?;
            let dump = queries::dump_rowid(&mut pager, root, rowid)?;
            print!("{}", dump);
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
    Ok(())
}

/// A root argument is either a page number or a table name to look up in
/// the schema.
fn resolve_root(pager: &mut Pager, arg: &str) -> Result<PageNum> {
    if let Ok(pgno) = arg.parse::<PageNum>() {
        return Ok(pgno);
    }
    if arg == "sqlite_schema" || arg == "sqlite_master" {
        return Ok(1);
    }
    let roots = schema::list_roots(pager)?;
    for entry in roots {
        if entry.name == arg {
            return Ok(entry.root);
        }
    }
    bail!("no table or index named '{}' in the schema", arg)
}

fn write_page_list(path: &str, pages: &[PageNum]) -> Result<()> {
    use std::io::Write;
    let mut f = std::fs::File::create(path).with_context(|| format!("creating {}", path))?;
    for p in pages {
        writeln!(f, "{}", p)?;
    }
    println!("wrote {} page number(s) to {}", pages.len(), path);
    Ok(())
}
