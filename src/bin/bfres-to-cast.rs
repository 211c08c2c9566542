use std::env;
use std::fs;
use std::io::{self, BufRead, Cursor};
use std::path::{Path, PathBuf};
use std::process;
use bfres_convert::bfres::FresFile;
use bfres_convert::{cast, convert};


const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];


fn main() -> io::Result<()> {
    let args = env::args_os().skip(1).collect::<Vec<_>>();
    let paths = if args.is_empty() {
        match prompt_for_path()? {
            Some(path) => vec![path],
            None => return Ok(()),
        }
    } else {
        args.into_iter().map(PathBuf::from).collect::<Vec<_>>()
    };

    // One bad input aborts that file only; the rest of the batch still
    // converts.
    let mut failures = 0;
    for path in &paths {
        if let Err(err) = convert_file(path) {
            eprintln!("{}: {}", path.display(), err);
            failures += 1;
        }
    }
    if failures != 0 {
        process::exit(1);
    }
    Ok(())
}

fn prompt_for_path() -> io::Result<Option<PathBuf>> {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        println!("enter the path of the file to convert, or \"exit\" to quit:");
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let input = line.trim();
        if input == "exit" {
            return Ok(None);
        }
        if !input.is_empty() && Path::new(input).is_file() {
            return Ok(Some(PathBuf::from(input)));
        }
        println!("invalid path.");
    }
}

fn convert_file(path: &Path) -> io::Result<()> {
    let mut data = fs::read(path)?;
    // Compressed inputs are detected by the stream header, not the file
    // extension.
    if data.len() >= 4 && data[.. 4] == ZSTD_MAGIC {
        data = zstd::decode_all(Cursor::new(&data[..]))?;
    }

    let mut file = FresFile::new(Cursor::new(&data[..]));
    let res = file.read_res_file()?;

    // Some containers carry a file extension inside their internal name;
    // the output directory uses the stem.
    let stem = Path::new(&res.name).file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| res.name.clone());
    let dir = path.parent().unwrap_or_else(|| Path::new(".")).join(stem);
    fs::create_dir_all(&dir)?;

    println!("processing {}...", res.name);
    for model in &res.models {
        let root = convert::convert_model(model, &res)?;
        let out_path = dir.join(format!("{}.cast", model.name));
        cast::write_file(&out_path, &root)?;
        println!("saved model {}", model.name);
    }
    println!();
    Ok(())
}
