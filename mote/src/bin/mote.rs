// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

fn main() {
    if let Err(err) = mote::server::run_server() {
        eprintln!("mote: {err}");
        std::process::exit(1);
    }
}
