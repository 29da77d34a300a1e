use std::{
    error::Error,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use heapstore::{
    page::slots_per_page, Database, DbIterator, Field, FieldType, HeapFile, PageId, Tuple,
    TupleDesc,
};

#[derive(Parser, Debug)]
#[command(name = "heapstore-cli", version, about = "Inspect and load heap files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print page count and slot usage per page
    Info {
        file: PathBuf,
        /// Comma separated field types, e.g. `int,int,str`
        #[arg(long)]
        schema: String,
    },
    /// Print every tuple, one per line
    Scan {
        file: PathBuf,
        #[arg(long)]
        schema: String,
    },
    /// Insert one tuple and commit
    Insert {
        file: PathBuf,
        #[arg(long)]
        schema: String,
        values: Vec<String>,
    },
}

fn open(db: &Database, file: &Path, schema: &str) -> Result<Arc<HeapFile>, Box<dyn Error>> {
    let desc = Arc::new(TupleDesc::parse(schema)?);
    Ok(db.open_table(file, desc, "cli")?)
}

fn info(table: &HeapFile) -> Result<(), Box<dyn Error>> {
    let num_pages = table.num_pages()?;
    println!("file:           {}", table.path().display());
    println!("table id:       {}", table.id());
    println!("schema:         {}", table.desc());
    println!("pages:          {num_pages}");
    println!("slots per page: {}", slots_per_page(table.desc().size()));
    for page_no in 0..num_pages {
        let page = table.read_page(PageId::new(table.id(), page_no))?;
        println!(
            "  page {page_no}: {}/{} used",
            page.num_slots() - page.num_empty_slots(),
            page.num_slots()
        );
    }
    Ok(())
}

fn scan(db: &Database, table: &Arc<HeapFile>) -> Result<(), Box<dyn Error>> {
    let tx = db.begin();
    let mut iter = table.iterator(tx.id(), Arc::clone(db.page_cache()));
    iter.open()?;
    let mut count = 0;
    while iter.has_next()? {
        print!("{}", iter.next()?);
        count += 1;
    }
    iter.close();
    tx.abort()?;
    println!("({count} tuples)");
    Ok(())
}

fn parse_tuple(desc: &Arc<TupleDesc>, values: &[String]) -> Result<Tuple, Box<dyn Error>> {
    if values.len() != desc.num_fields() {
        return Err(format!(
            "schema has {} fields but {} values were given",
            desc.num_fields(),
            values.len()
        )
        .into());
    }
    let mut fields = Vec::with_capacity(values.len());
    for (i, value) in values.iter().enumerate() {
        let field = match desc.field_type(i) {
            Some(FieldType::Int) => Field::Int(value.parse()?),
            Some(FieldType::Str) => Field::Str(value.clone()),
            None => return Err(format!("no field {i} in schema").into()),
        };
        fields.push(field);
    }
    Ok(Tuple::new(Arc::clone(desc), fields)?)
}

fn insert(db: &Database, table: &HeapFile, values: &[String]) -> Result<(), Box<dyn Error>> {
    let tuple = parse_tuple(table.desc(), values)?;
    let tx = db.begin();
    tx.insert_tuple(table.id(), tuple)?;
    tx.commit().map_err(|(tx, e)| {
        if let Err(abort_err) = tx.abort() {
            eprintln!("abort after failed commit also failed: {abort_err}");
        }
        e
    })?;
    println!("inserted 1 tuple");
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let db = Database::default();
    match &cli.command {
        Command::Info { file, schema } => {
            let desc = Arc::new(TupleDesc::parse(schema)?);
            info(&HeapFile::open_read_only(file, desc)?)
        }
        Command::Scan { file, schema } => scan(&db, &open(&db, file, schema)?),
        Command::Insert {
            file,
            schema,
            values,
        } => insert(&db, &*open(&db, file, schema)?, values),
    }
}
