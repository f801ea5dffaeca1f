//! Integration tests for ingest followed by output
//!
//! These run several ranks as threads, count real FASTA input, write the table
//! with every output strategy, and read the raw bytes back.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use kmerstream_lib::ingest::FsFileSizer;
use kmerstream_lib::memory::FixedMemory;
use kmerstream_lib::output::{flatten, rank_path};
use kmerstream_lib::record::{decode_records, RECORD_SIZE};
use kmerstream_lib::{
    run_ranks, write_blob, write_table, Communicator, DistributedCountTable,
    IngestConfiguration, KmerSpec, OutputConfig, SelfComm, StreamingIngest, TableKind,
    WriteStrategy,
};
use tempfile::{tempdir, NamedTempFile};

const WRITERS: [u32; 7] = [2, 3, 5, 6, 7, 8, 10];

fn fasta(seqs: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for (i, seq) in seqs.iter().enumerate() {
        writeln!(file, ">read{i}\n{seq}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn expected_counts(k: usize, seqs: &[&str]) -> BTreeMap<u64, u32> {
    let spec = KmerSpec::new(k, false).unwrap();
    let mut counts = BTreeMap::new();
    for seq in seqs {
        for kmer in spec.kmers(seq.as_bytes()) {
            *counts.entry(kmer).or_insert(0) += 1;
        }
    }
    counts
}

fn decode_into(bytes: &[u8], into: &mut BTreeMap<u64, u32>) {
    for record in decode_records(bytes).unwrap() {
        let (key, count) = (record.key, record.count);
        assert!(into.insert(key, count).is_none(), "key {key} written twice");
    }
}

/// Bytes of every file a write produced, in rank order
fn read_back(config: &OutputConfig, ranks: usize) -> Vec<Vec<u8>> {
    if config.strategy.shared_file() {
        vec![std::fs::read(&config.base_name).unwrap()]
    } else {
        (0..ranks)
            .map(|r| std::fs::read(rank_path(&config.base_name, r)).unwrap())
            .collect()
    }
}

#[test]
fn test_every_writer_round_trips_a_multi_rank_table() {
    let seqs_a = ["ACGTACGTTGCAAGT", "GGGATTACAGGG", "TTTTTTTT", "CAGTCAGTNNCAGT"];
    let seqs_b = ["ACGTTTGACCA", "GATTACAGATTACA"];
    let a = fasta(&seqs_a);
    let b = fasta(&seqs_b);
    let files = vec![a.path().to_path_buf(), b.path().to_path_buf()];
    let all: Vec<&str> = seqs_a.iter().chain(seqs_b.iter()).copied().collect();
    let expected = expected_counts(6, &all);

    let dir = tempdir().unwrap();
    for id in WRITERS {
        for table_kind in [TableKind::Hash, TableKind::Sorted] {
            let strategy = WriteStrategy::try_from(id).unwrap();
            let config = IngestConfiguration {
                k: 6,
                writer: strategy,
                table: table_kind,
                output: dir.path().join(format!("counts_{id}_{table_kind}.bin")),
                global_reserve_bytes: 0,
                // not a multiple of the record size, so records straddle chunks
                chunk_bytes: 40,
                block_size: 64,
                open_direct: false,
                num_ranks: 4,
                ranks_per_node: 2,
                ..IngestConfiguration::default()
            };

            let blobs = run_ranks(4, 2, |comm| {
                let mut table =
                    DistributedCountTable::new(config.table.new_container(config.seed), config.seed);
                StreamingIngest::new(&config, &comm)
                    .unwrap()
                    .run(&files, &mut table, &mut FixedMemory(1 << 30), &mut FsFileSizer)
                    .unwrap();
                let written = write_table(&table, &comm, &config.output_config()).unwrap();
                let blob = flatten(table.local()).unwrap().into_owned();
                assert_eq!(written, blob.len() as u64);
                blob
            })
            .unwrap();

            let output = config.output_config();
            let on_disk = read_back(&output, 4);
            if strategy.shared_file() {
                assert_eq!(on_disk[0], blobs.concat(), "writer {strategy}");
            } else {
                assert_eq!(on_disk, blobs, "writer {strategy}");
            }

            let mut counts = BTreeMap::new();
            for bytes in &on_disk {
                assert_eq!(bytes.len() % RECORD_SIZE, 0);
                decode_into(bytes, &mut counts);
            }
            assert_eq!(counts, expected, "writer {strategy} table {table_kind}");
        }
    }
}

#[test]
fn test_empty_blobs_produce_empty_files() {
    let dir = tempdir().unwrap();
    for id in WRITERS {
        let strategy = WriteStrategy::try_from(id).unwrap();
        let config = OutputConfig {
            open_direct: false,
            ..OutputConfig::new(dir.path().join(format!("empty{id}.bin")), strategy)
        };
        let written = run_ranks(3, 3, |comm| write_blob(&[], &comm, &config).unwrap()).unwrap();
        assert_eq!(written, vec![0, 0, 0]);
        for bytes in read_back(&config, 3) {
            assert!(bytes.is_empty(), "writer {strategy}");
        }
    }
}

#[test]
fn test_output_smaller_than_one_block() {
    let dir = tempdir().unwrap();
    let record = {
        let mut bytes = Vec::with_capacity(RECORD_SIZE);
        bytes.extend_from_slice(&0x1234_5678_9abc_def0u64.to_ne_bytes());
        bytes.extend_from_slice(&7u32.to_ne_bytes());
        bytes
    };
    for id in WRITERS {
        let strategy = WriteStrategy::try_from(id).unwrap();
        let config = OutputConfig {
            block_size: 4096,
            open_direct: false,
            ..OutputConfig::new(dir.path().join(format!("tiny{id}.bin")), strategy)
        };
        write_blob(&record, &SelfComm, &config).unwrap();
        assert_eq!(read_back(&config, 1), vec![record.clone()], "writer {strategy}");
    }
}

#[test]
fn test_shared_file_offsets_follow_rank_order() {
    let dir = tempdir().unwrap();
    let lens = [25usize, 0, 3, 61, 12];
    for strategy in [WriteStrategy::Collective, WriteStrategy::Mmap { serialized: true }] {
        let config = OutputConfig {
            chunk_bytes: 8,
            ..OutputConfig::new(dir.path().join(format!("shared{}.bin", strategy.id())), strategy)
        };
        run_ranks(5, 2, |comm| {
            let blob = vec![comm.rank() as u8 + 10; lens[comm.rank()]];
            write_blob(&blob, &comm, &config).unwrap()
        })
        .unwrap();

        let bytes = std::fs::read(&config.base_name).unwrap();
        let mut offset = 0;
        for (rank, len) in lens.iter().enumerate() {
            assert!(bytes[offset..offset + len].iter().all(|&b| b == rank as u8 + 10));
            offset += len;
        }
        assert_eq!(offset, bytes.len());
    }
}

#[test]
fn test_missing_input_fails_on_every_rank() {
    let missing: Vec<PathBuf> = vec![Path::new("/nonexistent/reads.fa").to_path_buf()];
    let config = IngestConfiguration {
        k: 5,
        global_reserve_bytes: 0,
        ..IngestConfiguration::default()
    };
    let outcomes = run_ranks(2, 1, |comm| {
        let mut table = DistributedCountTable::new(TableKind::Hash.new_container(1), 1);
        StreamingIngest::new(&config, &comm)
            .unwrap()
            .run(&missing, &mut table, &mut FixedMemory(1 << 30), &mut FsFileSizer)
            .is_err()
    })
    .unwrap();
    assert_eq!(outcomes, vec![true, true]);
}
