//-
// Copyright (c) 2020, The E3Mail developers
//
// This file is part of E3Mail.
//
// E3Mail is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// E3Mail is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// E3Mail. If not, see <http://www.gnu.org/licenses/>.

/// Determine whether the given name is "safe".
///
/// Key aliases and account identifiers end up as file names or parts of file
/// names, so this excludes empty names and anything that could escape the
/// data directory or create hidden files. It also rejects the IMAP list
/// wildcards so a folder name taken from configuration cannot turn into a
/// pattern.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty() &&
        name.len() <= 255 &&
        // Block directory traversal through .. and creation of hidden files on
        // UNIX
        !name.starts_with('.') &&
        !name.contains('/') &&
        !name.contains('\\') &&
        // Don't allow any ASCII control characters
        name.find(|c| c < ' ' || c == '\x7F').is_none() &&
        name.find(|c| c == '*' || c == '%').is_none()
}
