//! Minimal ISO9660 image writer.
//!
//! Just enough of ECMA-119 for a cloud-init seed: one volume descriptor,
//! one root directory, a handful of small files. File identifiers are
//! written verbatim (relaxed d-characters; the Linux iso9660 driver accepts
//! lowercase and dashes), no Rock Ridge or Joliet extensions.
//!
//! Layout: sectors 0–15 system area, 16 primary volume descriptor, 17
//! terminator, 18/19 L- and M-path tables, 20 root directory, 21+ file
//! extents in input order.

const SECTOR: usize = 2048;
const PVD_SECTOR: u32 = 16;
const L_PATH_TABLE_SECTOR: u32 = 18;
const M_PATH_TABLE_SECTOR: u32 = 19;
const ROOT_DIR_SECTOR: u32 = 20;
const FIRST_FILE_SECTOR: u32 = 21;

fn both_u32(buf: &mut [u8], value: u32) {
    buf[..4].copy_from_slice(&value.to_le_bytes());
    buf[4..8].copy_from_slice(&value.to_be_bytes());
}

fn both_u16(buf: &mut [u8], value: u16) {
    buf[..2].copy_from_slice(&value.to_le_bytes());
    buf[2..4].copy_from_slice(&value.to_be_bytes());
}

fn sectors_for(len: usize) -> u32 {
    len.div_ceil(SECTOR) as u32
}

/// A directory record. Flags: 0x00 file, 0x02 directory.
fn dir_record(extent: u32, size: u32, flags: u8, identifier: &[u8]) -> Vec<u8> {
    let id_len = identifier.len();
    // 33-byte fixed header + identifier, padded to an even record length.
    let mut len = 33 + id_len;
    if len % 2 != 0 {
        len += 1;
    }
    let mut rec = vec![0u8; len];
    rec[0] = len as u8;
    both_u32(&mut rec[2..10], extent);
    both_u32(&mut rec[10..18], size);
    // Recording date left zeroed (unspecified).
    rec[25] = flags;
    both_u16(&mut rec[28..32], 1);
    rec[32] = id_len as u8;
    rec[33..33 + id_len].copy_from_slice(identifier);
    rec
}

/// One-entry path table (the root directory).
fn path_table(big_endian: bool) -> Vec<u8> {
    let mut entry = vec![0u8; 10];
    entry[0] = 1; // identifier length
    let extent = if big_endian {
        ROOT_DIR_SECTOR.to_be_bytes()
    } else {
        ROOT_DIR_SECTOR.to_le_bytes()
    };
    entry[2..6].copy_from_slice(&extent);
    let parent: u16 = 1;
    let parent = if big_endian {
        parent.to_be_bytes()
    } else {
        parent.to_le_bytes()
    };
    entry[6..8].copy_from_slice(&parent);
    // identifier 0x00, one pad byte — both already zero.
    entry
}

fn padded(field: &mut [u8], text: &str) {
    field.fill(b' ');
    let bytes = text.as_bytes();
    let n = bytes.len().min(field.len());
    field[..n].copy_from_slice(&bytes[..n]);
}

/// Build an ISO9660 image containing `files` in the root directory.
///
/// All file identifiers together must fit in the single root-directory
/// sector; a cidata seed carries two.
pub fn write_iso(volume_label: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
    // File extents, in input order.
    let mut extents: Vec<(u32, usize)> = Vec::with_capacity(files.len());
    let mut next = FIRST_FILE_SECTOR;
    for (_, data) in files {
        extents.push((next, data.len()));
        next += sectors_for(data.len()).max(1);
    }
    let total_sectors = next;

    let mut image = vec![0u8; total_sectors as usize * SECTOR];

    // ── Root directory ────────────────────────────────────────────
    let root = &mut image
        [ROOT_DIR_SECTOR as usize * SECTOR..(ROOT_DIR_SECTOR as usize + 1) * SECTOR];
    let mut offset = 0;
    for (identifier, flags) in [(&[0u8][..], 0x02u8), (&[1u8][..], 0x02u8)] {
        let rec = dir_record(ROOT_DIR_SECTOR, SECTOR as u32, flags, identifier);
        root[offset..offset + rec.len()].copy_from_slice(&rec);
        offset += rec.len();
    }
    for ((name, data), (extent, _)) in files.iter().zip(&extents) {
        let rec = dir_record(*extent, data.len() as u32, 0x00, name.as_bytes());
        assert!(
            offset + rec.len() <= SECTOR,
            "root directory overflows one sector"
        );
        root[offset..offset + rec.len()].copy_from_slice(&rec);
        offset += rec.len();
    }

    // ── File data ─────────────────────────────────────────────────
    for ((_, data), (extent, _)) in files.iter().zip(&extents) {
        let start = *extent as usize * SECTOR;
        image[start..start + data.len()].copy_from_slice(data);
    }

    // ── Path tables ───────────────────────────────────────────────
    let l_table = path_table(false);
    let m_table = path_table(true);
    let l_start = L_PATH_TABLE_SECTOR as usize * SECTOR;
    image[l_start..l_start + l_table.len()].copy_from_slice(&l_table);
    let m_start = M_PATH_TABLE_SECTOR as usize * SECTOR;
    image[m_start..m_start + m_table.len()].copy_from_slice(&m_table);

    // ── Primary volume descriptor ─────────────────────────────────
    let root_record = dir_record(ROOT_DIR_SECTOR, SECTOR as u32, 0x02, &[0u8]);
    let pvd = &mut image[PVD_SECTOR as usize * SECTOR..(PVD_SECTOR as usize + 1) * SECTOR];
    pvd[0] = 1; // type: primary
    pvd[1..6].copy_from_slice(b"CD001");
    pvd[6] = 1; // version
    padded(&mut pvd[8..40], ""); // system identifier
    padded(&mut pvd[40..72], volume_label);
    both_u32(&mut pvd[80..88], total_sectors);
    both_u16(&mut pvd[120..124], 1); // volume set size
    both_u16(&mut pvd[124..128], 1); // volume sequence number
    both_u16(&mut pvd[128..132], SECTOR as u16);
    both_u32(&mut pvd[132..140], l_table.len() as u32);
    pvd[140..144].copy_from_slice(&L_PATH_TABLE_SECTOR.to_le_bytes());
    pvd[148..152].copy_from_slice(&M_PATH_TABLE_SECTOR.to_be_bytes());
    pvd[156..156 + root_record.len()].copy_from_slice(&root_record);
    padded(&mut pvd[190..318], ""); // volume set identifier
    padded(&mut pvd[318..446], ""); // publisher
    padded(&mut pvd[446..574], ""); // data preparer
    padded(&mut pvd[574..702], "HIVE"); // application
    padded(&mut pvd[702..739], "");
    padded(&mut pvd[739..776], "");
    padded(&mut pvd[776..813], "");
    for date in [813..830, 830..847, 847..864, 864..881] {
        pvd[date.start..date.end - 1].fill(b'0');
        pvd[date.end - 1] = 0;
    }
    pvd[881] = 1; // file structure version

    // ── Terminator descriptor ─────────────────────────────────────
    let term_start = (PVD_SECTOR as usize + 1) * SECTOR;
    image[term_start] = 255;
    image[term_start + 1..term_start + 6].copy_from_slice(b"CD001");
    image[term_start + 6] = 1;

    image
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Walk the root directory of a generated image and extract files.
    fn read_files(image: &[u8]) -> Vec<(String, Vec<u8>)> {
        let pvd = &image[16 * SECTOR..17 * SECTOR];
        assert_eq!(&pvd[1..6], b"CD001");
        let root_extent = u32::from_le_bytes(pvd[158..162].try_into().unwrap()) as usize;

        let dir = &image[root_extent * SECTOR..(root_extent + 1) * SECTOR];
        let mut files = Vec::new();
        let mut offset = 0;
        while offset < SECTOR && dir[offset] != 0 {
            let rec_len = dir[offset] as usize;
            let rec = &dir[offset..offset + rec_len];
            let extent = u32::from_le_bytes(rec[2..6].try_into().unwrap()) as usize;
            let size = u32::from_le_bytes(rec[10..14].try_into().unwrap()) as usize;
            let flags = rec[25];
            let id_len = rec[32] as usize;
            let id = &rec[33..33 + id_len];
            if flags & 0x02 == 0 {
                let name = String::from_utf8(id.to_vec()).unwrap();
                let data = image[extent * SECTOR..extent * SECTOR + size].to_vec();
                files.push((name, data));
            }
            offset += rec_len;
        }
        files
    }

    #[test]
    fn magic_and_label() {
        let image = write_iso("cidata", &[("user-data", b"#cloud-config\n")]);
        assert_eq!(&image[16 * SECTOR + 1..16 * SECTOR + 6], b"CD001");
        let label = &image[16 * SECTOR + 40..16 * SECTOR + 72];
        assert!(label.starts_with(b"cidata"));
        assert!(label[6..].iter().all(|&b| b == b' '));
        // Terminator follows.
        assert_eq!(image[17 * SECTOR], 255);
        assert_eq!(&image[17 * SECTOR + 1..17 * SECTOR + 6], b"CD001");
    }

    #[test]
    fn files_round_trip() {
        let user_data = b"#cloud-config\nhostname: hive-vm-test\n".to_vec();
        let meta_data = b"instance-id: i-1\nlocal-hostname: hive-vm-test\n".to_vec();
        let image = write_iso(
            "cidata",
            &[("user-data", &user_data), ("meta-data", &meta_data)],
        );

        let files = read_files(&image);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, "user-data");
        assert_eq!(files[0].1, user_data);
        assert_eq!(files[1].0, "meta-data");
        assert_eq!(files[1].1, meta_data);
    }

    #[test]
    fn image_is_sector_aligned() {
        let image = write_iso("cidata", &[("user-data", &vec![0xabu8; 5000])]);
        assert_eq!(image.len() % SECTOR, 0);
        // 21 metadata sectors + 3 for the 5000-byte file.
        assert_eq!(image.len(), 24 * SECTOR);
    }

    #[test]
    fn multi_sector_file_lands_contiguously() {
        let big = (0..6000u32).flat_map(|i| i.to_le_bytes()).collect::<Vec<u8>>();
        let small = b"instance-id: i-2\n".to_vec();
        let image = write_iso("cidata", &[("user-data", &big), ("meta-data", &small)]);
        let files = read_files(&image);
        assert_eq!(files[0].1, big);
        assert_eq!(files[1].1, small);
    }

    #[test]
    fn both_endian_sizes_agree() {
        let image = write_iso("cidata", &[("user-data", b"x")]);
        let pvd = &image[16 * SECTOR..17 * SECTOR];
        let le = u32::from_le_bytes(pvd[80..84].try_into().unwrap());
        let be = u32::from_be_bytes(pvd[84..88].try_into().unwrap());
        assert_eq!(le, be);
        assert_eq!(le as usize * SECTOR, image.len());
    }
}
