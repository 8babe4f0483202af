//! Single-threaded cooperative loop over all `ByteConn`s plus the listening socket and the
//! SIGCHLD-notification descriptor.

use crate::{
	config::Config,
	conn::{ByteConn, PollFlags},
	fd::{catch_sigchld, drain_signalfd, Fd},
	handlers,
	judge_driver::JudgeDriver,
	request_fsm::{self, Phase, Row, MAX_BODY_LEN, MAX_LINE_LEN},
	submission::SubmissionQueue,
};
use eyre::{Result, WrapErr};
use log::{debug, info, trace, warn};
use nix::poll::{poll, PollFd};
use std::{
	net::TcpListener,
	os::unix::io::AsRawFd,
	time::{Duration, Instant},
};

/// Maximum simultaneous connections.
const CAPACITY: usize = 16;
/// Connection inactivity timeout.
const CONN_TIMEOUT: Duration = Duration::from_secs(10);
/// Readiness-wait timeout: the loop's per-tick resolution.
const TICK: Duration = Duration::from_secs(1);

pub struct PollLoop {
	config: Config,
	listener: TcpListener,
	sigchld: Fd,
	rows: Vec<Option<Row>>,
	queue: SubmissionQueue,
	judge: JudgeDriver,
}

impl PollLoop {
	pub fn bind(config: Config) -> Result<Self> {
		let listener = TcpListener::bind(("0.0.0.0", config.port))
			.wrap_err_with(|| format!("binding to port {} failed", config.port))?;
		listener.set_nonblocking(true).wrap_err("setting listening socket to nonblocking failed")?;
		set_cloexec(&listener).wrap_err("setting close-on-exec on listening socket failed")?;

		let sigchld = catch_sigchld().wrap_err("installing SIGCHLD signalfd failed")?;

		let mut rows = Vec::with_capacity(CAPACITY);
		rows.resize_with(CAPACITY, || None);

		Ok(Self { config, listener, sigchld, rows, queue: SubmissionQueue::new(), judge: JudgeDriver::default() })
	}

	/// The address the listening socket is bound to. Useful for tests that bind to an
	/// OS-assigned ephemeral port.
	pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
		self.listener.local_addr()
	}

	/// Run ticks forever. Returns only when the listening socket hangs up or errors.
	pub fn run(&mut self) -> Result<()> {
		loop {
			self.tick()?;
		}
	}

	/// Run one iteration of the event loop: reap slow connections, wait for readiness, service
	/// whatever is ready, and accept at most one new connection.
	pub fn tick(&mut self) -> Result<()> {
		self.kill_slow_connections();

		let mut pollfds = Vec::with_capacity(CAPACITY + 2);
		let mut row_of = Vec::with_capacity(CAPACITY);
		for (idx, row) in self.rows.iter().enumerate() {
			if let Some(row) = row {
				if !row.conn.is_hung() {
					pollfds.push(PollFd::new(row.conn.fd(), row.conn.events()));
					row_of.push(idx);
				}
			}
		}
		let listener_pos = pollfds.len();
		pollfds.push(PollFd::new(self.listener.as_raw_fd(), PollFlags::POLLIN));
		let sigchld_pos = pollfds.len();
		pollfds.push(PollFd::new(self.sigchld.as_raw_fd(), PollFlags::POLLIN));

		trace!("polling {} fds for {TICK:?}", pollfds.len());
		match poll(&mut pollfds, TICK.as_millis() as i32) {
			Ok(_) => (),
			Err(err) => {
				warn!("poll failed, continuing: {err}");
				return Ok(());
			},
		}

		for (i, &idx) in row_of.iter().enumerate() {
			let Some(revents) = pollfds[i].revents() else { continue };
			if revents.is_empty() {
				continue;
			}
			self.service_row(idx, revents);
		}

		if pollfds[sigchld_pos].revents().is_some_and(|e| e.contains(PollFlags::POLLIN)) {
			drain_signalfd(&self.sigchld);
			self.judge.reap(&self.config, &mut self.queue);
		}

		self.reap_dead_rows();

		if pollfds[listener_pos].revents().map_or(false, |e| e.intersects(PollFlags::POLLHUP | PollFlags::POLLERR)) {
			eyre::bail!("listening socket hung up or errored");
		}
		if pollfds[listener_pos].revents().is_some_and(|e| e.contains(PollFlags::POLLIN)) {
			self.accept_one();
		}

		Ok(())
	}

	fn kill_slow_connections(&mut self) {
		let now = Instant::now();
		for row in self.rows.iter_mut().flatten() {
			if now.duration_since(row.started_at) > CONN_TIMEOUT {
				debug!("connection fd {} timed out", row.conn.fd());
				row.conn.hang();
			}
		}
	}

	fn service_row(&mut self, idx: usize, revents: PollFlags) {
		let hard_fail = {
			let row = self.rows[idx].as_mut().expect("row_of only names occupied slots");
			row.conn.poll(revents)
		};
		if hard_fail {
			self.rows[idx].as_mut().unwrap().conn.hang();
			return;
		}
		self.advance_fsm(idx);
	}

	fn advance_fsm(&mut self, idx: usize) {
		loop {
			let phase = self.rows[idx].as_ref().unwrap().phase;
			match phase {
				Phase::AwaitLine => {
					if !self.try_consume_line(idx) {
						break;
					}
				},
				Phase::AwaitBody => {
					if !self.try_complete_body(idx) {
						break;
					}
				},
				Phase::Done => {
					let row = self.rows[idx].as_mut().unwrap();
					if row.conn.outbound_is_empty() {
						row.conn.hang();
					}
					break;
				},
			}
		}
	}

	/// Returns `true` if a transition happened (so the caller should re-check phase).
	fn try_consume_line(&mut self, idx: usize) -> bool {
		let row = self.rows[idx].as_mut().unwrap();
		let Some(end) = row.conn.line_end() else { return false };
		if end > MAX_LINE_LEN + 1 {
			debug!("fd {}: request line too long, hanging up", row.conn.fd());
			row.conn.hang();
			return false;
		}
		let line = row.conn.peek_in()[..end].to_vec();
		row.conn.consume(end);
		row.request_line = line;

		let Some(cmd) = request_fsm::command(&row.request_line) else {
			row.conn.hang();
			return false;
		};
		match cmd {
			b"register" => {
				let fields = request_fsm::fields(&row.request_line, 2);
				let reply = handlers::register(&self.config.users_path, fields.first().copied(), fields.get(1).copied());
				let row = self.rows[idx].as_mut().unwrap();
				row.conn.send(reply.as_bytes());
				row.phase = Phase::Done;
			},
			b"report" => {
				let fields = request_fsm::fields(&row.request_line, 1);
				let reply = handlers::report(fields.first().copied(), &self.queue);
				let row = self.rows[idx].as_mut().unwrap();
				row.conn.send(&reply);
				row.phase = Phase::Done;
			},
			b"submit" => {
				row.phase = Phase::AwaitBody;
			},
			_ => {
				row.conn.hang();
				return false;
			},
		}
		true
	}

	/// Returns `true` if the body just completed and the submit handler ran.
	fn try_complete_body(&mut self, idx: usize) -> bool {
		let row = self.rows[idx].as_mut().unwrap();
		let marker = request_fsm::end_marker(&row.request_line);
		let ends_with_marker = row.conn.ends_with(&marker);
		let complete = row.conn.is_hung() || ends_with_marker;
		if !complete {
			if row.conn.inbound_len() > MAX_BODY_LEN {
				debug!("fd {}: submission body too large, hanging up", row.conn.fd());
				row.conn.hang();
			}
			return false;
		}

		let mut body = row.conn.consume_all();
		if ends_with_marker && body.len() >= marker.len() {
			let new_len = body.len() - marker.len();
			body.truncate(new_len);
		}

		let fields = request_fsm::fields(&row.request_line, 4);
		let header = handlers::SubmitHeader {
			user: fields.first().copied(),
			pass: fields.get(1).copied(),
			contest: fields.get(2).copied(),
			lang: fields.get(3).copied(),
		};
		let reply = handlers::submit(&self.config, &mut self.queue, &mut self.judge, &header, &body);

		let row = self.rows[idx].as_mut().unwrap();
		row.conn.send(reply.as_bytes());
		row.phase = Phase::Done;
		true
	}

	fn reap_dead_rows(&mut self) {
		for row in self.rows.iter_mut() {
			if matches!(row, Some(r) if r.conn.is_hung()) {
				*row = None;
			}
		}
	}

	fn accept_one(&mut self) {
		let (sock, addr) = match self.listener.accept() {
			Ok(pair) => pair,
			Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return,
			Err(err) => {
				warn!("accept failed: {err}");
				return;
			},
		};
		let Some(slot) = self.rows.iter().position(Option::is_none) else {
			debug!("connection table full, dropping accepted connection from {addr}");
			return; // `sock` drops here, closing the fd
		};
		if let Err(err) = sock.set_nonblocking(true) {
			warn!("setting accepted socket nonblocking failed: {err}");
			return;
		}
		if let Err(err) = set_cloexec(&sock) {
			warn!("setting close-on-exec on accepted socket failed: {err}");
		}
		info!("accepted connection from {addr}");
		self.rows[slot] = Some(Row::new(ByteConn::new(sock)));
	}
}

fn set_cloexec(sock: &impl AsRawFd) -> nix::Result<()> {
	use nix::fcntl::{fcntl, FcntlArg, FdFlag};
	let flags = fcntl(sock.as_raw_fd(), FcntlArg::F_GETFD)?;
	let mut flags = FdFlag::from_bits_truncate(flags);
	flags.insert(FdFlag::FD_CLOEXEC);
	fcntl(sock.as_raw_fd(), FcntlArg::F_SETFD(flags))?;
	Ok(())
}
