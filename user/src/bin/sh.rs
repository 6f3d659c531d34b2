//! A minimal line-oriented shell: read a line, split on whitespace, and
//! either run a builtin (`cd`, `exit`) or fork+exec the first word as a
//! path with the rest as arguments.
#![no_std]
#![no_main]

use ulib::{print, println, usys};

ulib::entry!(main);

const MAXLINE: usize = 128;
const MAXWORDS: usize = 16;

fn read_line(buf: &mut [u8; MAXLINE]) -> usize {
    let mut n = 0;
    let mut byte = [0u8; 1];
    while n < buf.len() - 1 {
        if usys::read(0, &mut byte) != 1 {
            break;
        }
        if byte[0] == b'\n' || byte[0] == b'\r' {
            break;
        }
        buf[n] = byte[0];
        n += 1;
    }
    n
}

fn split_words<'a>(line: &'a str, words: &mut [&'a str; MAXWORDS]) -> usize {
    let mut n = 0;
    for word in line.split_whitespace() {
        if n >= MAXWORDS {
            break;
        }
        words[n] = word;
        n += 1;
    }
    n
}

fn main() -> i32 {
    loop {
        print!("$ ");

        let mut linebuf = [0u8; MAXLINE];
        let n = read_line(&mut linebuf);
        if n == 0 {
            // EOF on stdin with nothing typed: keep the prompt loop alive,
            // same as a blank line.
            continue;
        }
        let line = match core::str::from_utf8(&linebuf[..n]) {
            Ok(s) => s,
            Err(_) => continue,
        };

        let mut words: [&str; MAXWORDS] = [""; MAXWORDS];
        let argc = split_words(line, &mut words);
        if argc == 0 {
            continue;
        }

        match words[0] {
            "exit" => return 0,
            "cd" => {
                let target = if argc > 1 { words[1] } else { "/" };
                if ulib::chdir(target) < 0 {
                    println!("cd: cannot cd to {}", target);
                }
                continue;
            }
            _ => {}
        }

        let pid = usys::fork();
        if pid < 0 {
            println!("sh: fork failed");
            continue;
        }
        if pid == 0 {
            ulib::exec(words[0], &words[..argc]);
            println!("sh: exec {} failed", words[0]);
            usys::exit(1);
        }
        usys::wait(core::ptr::null_mut());
    }
}
