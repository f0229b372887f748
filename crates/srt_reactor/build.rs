// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

fn main() {
    if pkg_config::probe_library("srt").is_ok() {
        return;
    }

    // Fall back to a bare `-lsrt`: many distributions ship libsrt without a `.pc` file, and
    // developers frequently build it from source and install it under a standard lib path already
    // on the linker's search path.
    println!("cargo:rustc-link-lib=dylib=srt");
}
