use std::{fs::File, os::unix::prelude::PermissionsExt, path::Path};

use csv::Writer;

/// Appends to `path`, writing the header only when the file is new.
pub fn create_writer(path: &Path) -> Result<Writer<File>, std::io::Error> {
    let exists = path.exists();
    let f = File::options().create(true).append(true).open(path)?;
    let mut permissions = f.metadata()?.permissions();
    permissions.set_mode(0o664);
    f.set_permissions(permissions)?;
    Ok(csv::WriterBuilder::new()
        .has_headers(!exists)
        .from_writer(f))
}
